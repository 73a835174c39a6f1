//! The build orchestrator.
//!
//! [`Pipeline`] sequences one run:
//!
//! 1. **CommandBuilder** - resolve the project/workspace and synthesize `xcodebuild`
//! 2. **ProcessRunner** - run it to completion
//! 3. **OutputResolver** - package the `.app` or export the `.xcarchive`
//! 4. **ArtifactFinalizer** - inspect, rename, clean up
//! 5. **Publisher / MappingUploader** - hand the final artifact to collaborators
//!
//! Validator gates run between the stages. Any failure returns immediately
//! with a [`BuildError`]; the caller decides how to exit.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::command::CommandBuilder;
use crate::context::BuildContext;
use crate::finalize::{ArtifactFinalizer, mapping_file};
use crate::inspect::ArtifactInspector;
use crate::options::OptionSet;
use crate::resolver::OutputResolver;
use crate::runner::ProcessRunner;
use crate::types::{BuildError, CollaboratorError, FinalArtifact};
use crate::validate::fail;

/// Publishes a finished IPA to a distribution service.
pub trait Publisher {
    fn publish(&self, artifact: &FinalArtifact, options: &OptionSet)
    -> Result<(), CollaboratorError>;
}

impl<F> Publisher for F
where
    F: Fn(&FinalArtifact, &OptionSet) -> Result<(), CollaboratorError>,
{
    fn publish(
        &self,
        artifact: &FinalArtifact,
        options: &OptionSet,
    ) -> Result<(), CollaboratorError> {
        self(artifact, options)
    }
}

/// A dSYM mapping upload. Project id and credentials belong to the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingUpload<'a> {
    /// First file under `<final>.app.dSYM/Contents/Resources/DWARF/`.
    pub file: &'a Path,
    pub build: &'a str,
    pub version: &'a str,
}

/// Uploads debug-symbol mapping files for crash symbolication.
pub trait MappingUploader {
    fn upload_mapping(&self, upload: &MappingUpload<'_>) -> Result<(), CollaboratorError>;
}

impl<F> MappingUploader for F
where
    F: Fn(&MappingUpload<'_>) -> Result<(), CollaboratorError>,
{
    fn upload_mapping(&self, upload: &MappingUpload<'_>) -> Result<(), CollaboratorError> {
        self(upload)
    }
}

/// Drives one IPA build from options to final artifact.
///
/// # Example
///
/// ```ignore
/// use ipabuild_sdk::{IpaInspector, OptionSet, Pipeline, ShellRunner};
///
/// let options = OptionSet::new("ios", "ios/build_ipa");
/// let runner = ShellRunner::new();
/// let inspector = IpaInspector::new();
/// let artifact = Pipeline::new(&options, &runner, &inspector).run()?;
/// println!("{}", artifact.ipa_path.display());
/// # Ok::<(), ipabuild_sdk::BuildError>(())
/// ```
pub struct Pipeline<'a> {
    options: &'a OptionSet,
    runner: &'a dyn ProcessRunner,
    inspector: &'a dyn ArtifactInspector,
    publisher: Option<&'a dyn Publisher>,
    uploader: Option<&'a dyn MappingUploader>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        options: &'a OptionSet,
        runner: &'a dyn ProcessRunner,
        inspector: &'a dyn ArtifactInspector,
    ) -> Self {
        Self {
            options,
            runner,
            inspector,
            publisher: None,
            uploader: None,
        }
    }

    /// Collaborator used when `options.publish` is set.
    pub fn publisher(mut self, publisher: &'a dyn Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Collaborator used when `options.mapping` is set.
    pub fn mapping_uploader(mut self, uploader: &'a dyn MappingUploader) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Runs the build in a fresh scratch directory.
    pub fn run(&self) -> Result<FinalArtifact, BuildError> {
        let mut ctx = BuildContext::new(self.options.debug)?;
        self.run_in(&mut ctx)
    }

    /// Runs the build using an existing context.
    pub fn run_in(&self, ctx: &mut BuildContext) -> Result<FinalArtifact, BuildError> {
        let options = self.options;
        options.validate()?;
        let publisher = self.required(options.publish, self.publisher, "publish")?;
        let uploader = self.required(options.mapping, self.uploader, "mapping upload")?;

        fs::create_dir_all(&options.output_dir)?;

        let command = CommandBuilder::new(options, ctx.scratch_dir()).build()?;
        ctx.command = Some(command.to_string());
        info!(
            "Building {} ({})",
            options.build_dir.display(),
            options.mode().as_str()
        );
        self.runner.run(&command)?;

        let temp = OutputResolver::new(options, self.runner).resolve(ctx)?;
        ctx.temp_artifact = Some(temp.clone());

        let artifact = ArtifactFinalizer::new(options, self.inspector).finalize(&temp)?;

        if let Some(publisher) = publisher {
            info!("Publishing {}", artifact.ipa_path.display());
            publisher
                .publish(&artifact, options)
                .map_err(BuildError::Collaborator)?;
        }

        if let Some(uploader) = uploader {
            let file = artifact
                .dsym_path
                .as_deref()
                .and_then(mapping_file)
                .ok_or_else(|| {
                    fail(BuildError::Precondition(
                        "Mapping upload requested but the build produced no dSYM DWARF file.\n\n\
                         Check that DEBUG_INFORMATION_FORMAT is dwarf-with-dsym for this configuration."
                            .to_string(),
                    ))
                })?;
            info!("Uploading mapping file {}", file.display());
            uploader
                .upload_mapping(&MappingUpload {
                    file: &file,
                    build: &artifact.metadata.build,
                    version: &artifact.metadata.version,
                })
                .map_err(BuildError::Collaborator)?;
        }

        Ok(artifact)
    }

    /// Fails before building when a requested step has no collaborator.
    fn required<T: ?Sized>(
        &self,
        requested: bool,
        collaborator: Option<&'a T>,
        what: &str,
    ) -> Result<Option<&'a T>, BuildError> {
        match (requested, collaborator) {
            (false, _) => Ok(None),
            (true, Some(c)) => Ok(Some(c)),
            (true, None) => Err(fail(BuildError::Precondition(format!(
                "{} requested but no {} client is configured",
                what, what
            )))),
        }
    }
}
