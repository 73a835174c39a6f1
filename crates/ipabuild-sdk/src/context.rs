//! Per-run mutable state threaded through the pipeline stages.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::types::BuildError;

/// State derived from an [`crate::OptionSet`] for one build.
///
/// The scratch directory is created fresh for every run and removed when the
/// context is dropped, unless `retain` is set (debug mode), in which case it is
/// left in place for inspection.
#[derive(Debug)]
pub struct BuildContext {
    scratch_dir: PathBuf,
    retain: bool,
    /// The synthesized toolchain command line, once built.
    pub command: Option<String>,
    /// The unnamed IPA produced by the resolver, once confirmed on disk.
    pub temp_artifact: Option<PathBuf>,
}

impl BuildContext {
    /// Creates a uniquely named scratch directory under the system temp dir.
    pub fn new(retain: bool) -> Result<Self, BuildError> {
        let scratch_dir = tempfile::Builder::new()
            .prefix("ipabuild-")
            .tempdir()?
            .keep();
        debug!("Scratch directory: {}", scratch_dir.display());
        Ok(Self::with_scratch_dir(scratch_dir, retain))
    }

    /// Uses an existing directory as scratch space. It is still removed on drop
    /// unless `retain` is set.
    pub fn with_scratch_dir(scratch_dir: impl Into<PathBuf>, retain: bool) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            retain,
            command: None,
            temp_artifact: None,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn retains_scratch(&self) -> bool {
        self.retain
    }
}

impl Drop for BuildContext {
    fn drop(&mut self) {
        if self.retain {
            info!("Keeping scratch directory {}", self.scratch_dir.display());
            return;
        }
        if self.scratch_dir.exists()
            && let Err(e) = fs::remove_dir_all(&self.scratch_dir)
        {
            warn!(
                "Failed to remove scratch directory {}: {}",
                self.scratch_dir.display(),
                e
            );
        }
    }
}
