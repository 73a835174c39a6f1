//! Turning the unnamed temporary IPA into the final, deterministically named
//! output.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::inspect::ArtifactInspector;
use crate::options::OptionSet;
use crate::resolver::copy_dir_recursive;
use crate::types::{ArtifactMetadata, BuildError, BuildMode, FinalArtifact};
use crate::validate;

/// The override name when given, otherwise `<name>-<version>-build-<build>`.
pub fn final_name(options: &OptionSet, metadata: &ArtifactMetadata) -> String {
    match options.name() {
        Some(name) => name.to_string(),
        None => format!(
            "{}-{}-build-{}",
            metadata.name, metadata.version, metadata.build
        ),
    }
}

/// Renames the temporary IPA and its optional dSYM into the output directory.
pub struct ArtifactFinalizer<'a, I: ArtifactInspector + ?Sized> {
    options: &'a OptionSet,
    inspector: &'a I,
}

impl<'a, I: ArtifactInspector + ?Sized> ArtifactFinalizer<'a, I> {
    pub fn new(options: &'a OptionSet, inspector: &'a I) -> Self {
        Self { options, inspector }
    }

    /// Moves `temp_artifact` to `<output_dir>/<final_name>.ipa`, overwriting any
    /// previous output of the same name.
    ///
    /// The dSYM xcodebuild wrote as `<output_dir>/<metadata.name>.app.dSYM` is
    /// moved to `<output_dir>/<final_name>.app.dSYM` when present; its absence is
    /// not an error.
    pub fn finalize(&self, temp_artifact: &Path) -> Result<FinalArtifact, BuildError> {
        validate::require_artifact(temp_artifact)?;

        let metadata = self
            .inspector
            .inspect(temp_artifact)
            .map_err(BuildError::Collaborator)?;
        let output_dir = &self.options.output_dir;
        let name = final_name(self.options, &metadata);

        let ipa_path = output_dir.join(format!("{}.ipa", name));
        move_path(temp_artifact, &ipa_path)?;
        info!("IPA: {}", ipa_path.display());

        let dsym_source = output_dir.join(format!("{}.app.dSYM", metadata.name));
        let dsym_dest = output_dir.join(format!("{}.app.dSYM", name));
        let dsym_path = if dsym_source.exists() {
            if dsym_source != dsym_dest {
                move_path(&dsym_source, &dsym_dest)?;
            }
            info!("dSYM: {}", dsym_dest.display());
            Some(dsym_dest)
        } else {
            debug!("No dSYM found at {}", dsym_source.display());
            None
        };

        self.cleanup()?;
        info!("Build Success");

        Ok(FinalArtifact {
            ipa_path,
            dsym_path,
            metadata,
        })
    }

    /// Removes the intermediate `.xcarchive` in archive mode, unless debug mode
    /// keeps it for inspection. The direct-build scratch directory is owned by
    /// [`crate::BuildContext`].
    fn cleanup(&self) -> Result<(), BuildError> {
        if self.options.mode() != BuildMode::Archive || self.options.debug {
            return Ok(());
        }
        let archive = self.options.archive_bundle_path();
        if archive.exists() {
            debug!("Removing {}", archive.display());
            fs::remove_dir_all(&archive)?;
        }
        Ok(())
    }
}

/// Renames `src` to `dest`, replacing `dest`. Falls back to copy-and-delete
/// when the two live on different filesystems.
fn move_path(src: &Path, dest: &Path) -> Result<(), BuildError> {
    if dest.is_dir() {
        fs::remove_dir_all(dest)?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            if src.is_dir() {
                copy_dir_recursive(src, dest)?;
                fs::remove_dir_all(src)?;
            } else {
                fs::copy(src, dest)?;
                fs::remove_file(src)?;
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// First file under `<dsym>/Contents/Resources/DWARF/`, by name.
pub fn mapping_file(dsym: &Path) -> Option<PathBuf> {
    let dwarf = dsym.join("Contents/Resources/DWARF");
    let mut files: Vec<PathBuf> = fs::read_dir(&dwarf)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .collect();
    files.sort();
    files.into_iter().next()
}
