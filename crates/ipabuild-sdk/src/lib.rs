//! Xcode to IPA build core.
//!
//! `ipabuild-sdk` compiles an iOS project or workspace with `xcodebuild`, turns
//! the result into an `.ipa`, and renames it (and its dSYM) deterministically
//! from the metadata inside the produced archive.
//!
//! # Build modes
//!
//! - **Direct build** (no archive path): `xcodebuild build` into a scratch
//!   directory, then the largest `.app` bundle is zipped into an IPA.
//! - **Archive** (archive path given): `xcodebuild archive` into
//!   `<output>/<name>.xcarchive`, then `xcodebuild -exportArchive`.
//!
//! # Architecture
//!
//! - **[`OptionSet`]**: immutable build configuration
//! - **[`CommandBuilder`]**: synthesizes the xcodebuild command line
//! - **[`ProcessRunner`]**: executes commands (swappable in tests)
//! - **[`OutputResolver`]**: locates build output and produces a temporary IPA
//! - **[`validate`]**: fail-fast gates between stages
//! - **[`ArtifactFinalizer`]**: inspects, renames and cleans up
//! - **[`Pipeline`]**: sequences everything and calls publish/upload collaborators
//!
//! Toolchain success is judged only by artifacts on disk. xcodebuild can exit
//! 0 without producing anything, and non-zero while producing a usable app.
//!
//! # Example
//!
//! ```ignore
//! use ipabuild_sdk::{CustomSettings, IpaInspector, OptionSet, Pipeline, ShellRunner};
//!
//! let options = OptionSet {
//!     configuration: Some("Release".to_string()),
//!     custom_settings: CustomSettings::parse(["CODE_SIGN_STYLE=Manual"])?,
//!     ..OptionSet::new("ios", "ios/build_ipa")
//! };
//! let runner = ShellRunner::new().debug(options.debug);
//! let artifact = Pipeline::new(&options, &runner, &IpaInspector::new()).run()?;
//! println!("Built {}", artifact.ipa_path.display());
//! # Ok::<(), ipabuild_sdk::BuildError>(())
//! ```

pub mod command;
pub mod context;
pub mod finalize;
pub mod inspect;
pub mod options;
pub mod pipeline;
pub mod resolver;
pub mod runner;
pub mod types;
pub mod validate;

pub use command::{CommandBuilder, ShellCommand, shell_quote};
pub use context::BuildContext;
pub use finalize::{ArtifactFinalizer, final_name};
pub use inspect::{ArtifactInspector, IpaInspector};
pub use options::{CustomSettings, OptionSet};
pub use pipeline::{MappingUpload, MappingUploader, Pipeline, Publisher};
pub use resolver::OutputResolver;
pub use runner::{ProcessRunner, RunOutput, ShellRunner};
pub use types::{ArtifactMetadata, BuildError, BuildMode, CollaboratorError, FinalArtifact};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
