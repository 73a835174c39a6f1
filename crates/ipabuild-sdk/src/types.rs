//! Core types for ipabuild-sdk.
//!
//! - [`BuildError`] - Error taxonomy for the build pipeline
//! - [`BuildMode`] - Direct build vs. archive + export
//! - [`ArtifactMetadata`] - Name/version/build read from a produced IPA
//! - [`FinalArtifact`] - Deterministically named outputs handed to collaborators

use std::path::PathBuf;

/// Boxed error returned by external collaborators (inspection, publish, upload).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for ipabuild-sdk operations.
///
/// Every variant is terminal for the run. The binary maps them to a process
/// exit status through [`BuildError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A required input is missing or invalid: project, workspace, scheme,
    /// collaborator credentials.
    #[error("{0}")]
    Precondition(String),

    /// The toolchain ran but the expected artifact is not on disk.
    ///
    /// xcodebuild may exit 0 while producing nothing, so this is detected by
    /// explicit existence checks only.
    #[error("{0}")]
    MissingOutput(String),

    /// The produced artifact could not be read for metadata.
    #[error("failed to inspect artifact: {0}")]
    Inspect(String),

    /// An I/O error occurred while moving or packaging artifacts.
    #[error("I/O error: {0}. Check file paths and permissions")]
    Io(#[from] std::io::Error),

    /// An external collaborator failed. Passed through unmodified.
    #[error(transparent)]
    Collaborator(CollaboratorError),
}

impl BuildError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Gate failures are logged where they are detected; callers should not
    /// log them again.
    pub fn is_logged(&self) -> bool {
        matches!(
            self,
            BuildError::Precondition(_) | BuildError::MissingOutput(_)
        )
    }
}

/// Which of the two toolchain workflows a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// `xcodebuild build` into a scratch directory, then zip the app bundle.
    Direct,
    /// `xcodebuild archive` into an `.xcarchive`, then `-exportArchive`.
    Archive,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Direct => "build",
            BuildMode::Archive => "archive",
        }
    }
}

/// Metadata extracted from an installable archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    /// Bundle name (also the base name of the companion dSYM).
    pub name: String,
    /// Marketing version (`CFBundleShortVersionString`).
    pub version: String,
    /// Build number (`CFBundleVersion`).
    pub build: String,
}

/// Terminal output of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalArtifact {
    /// `<output_dir>/<final_name>.ipa`
    pub ipa_path: PathBuf,
    /// `<output_dir>/<final_name>.app.dSYM`, only when a dSYM was produced.
    pub dsym_path: Option<PathBuf>,
    /// Metadata read from the artifact before it was renamed.
    pub metadata: ArtifactMetadata,
}
