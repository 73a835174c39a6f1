//! Fail-fast gates between pipeline stages.
//!
//! Each check logs a descriptive error and returns a terminal [`BuildError`].
//! Nothing here is retried. Toolchain success is judged only by what exists on
//! disk afterwards, never by xcodebuild's exit status.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::error;

use crate::options::OptionSet;
use crate::types::BuildError;

/// The two Xcode container kinds a build can start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Project,
    Workspace,
}

impl FileKind {
    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Project => "xcodeproj",
            FileKind::Workspace => "xcworkspace",
        }
    }

    fn other(&self) -> FileKind {
        match self {
            FileKind::Project => FileKind::Workspace,
            FileKind::Workspace => FileKind::Project,
        }
    }
}

/// Logs a gate failure and hands it back for returning.
pub(crate) fn fail(err: BuildError) -> BuildError {
    error!("{}", err);
    err
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

/// Resolves the project or workspace bundle to build.
///
/// `path` may be the bundle itself or a directory containing one. When several
/// bundles of the kind exist, the first by name wins.
pub fn find_project_file(path: &Path, kind: FileKind) -> Result<PathBuf, BuildError> {
    let ext = kind.extension();
    if !path.exists() {
        return Err(fail(BuildError::Precondition(format!(
            "BUILD_DIR does not exist: {}\n\n\
             The first argument must be a .{} or a directory containing one.",
            path.display(),
            ext
        ))));
    }

    if has_extension(path, ext) {
        return Ok(path.to_path_buf());
    }

    let other = kind.other().extension();
    if has_extension(path, other) {
        return Err(fail(BuildError::Precondition(format!(
            "Expected a .{} but BUILD_DIR is a .{}: {}\n\n\
             Pass --workspace only when building an .xcworkspace.",
            ext,
            other,
            path.display()
        ))));
    }

    if !path.is_dir() {
        return Err(fail(BuildError::Precondition(format!(
            "BUILD_DIR must be a .{} or a directory: {}",
            ext,
            path.display()
        ))));
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(path)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| has_extension(p, ext))
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        fail(BuildError::Precondition(format!(
            "The .{} file is missing in {}.\n\n\
             Check BUILD_DIR or point it directly at the .{} bundle.",
            ext,
            path.display(),
            ext
        )))
    })
}

/// A workspace build must name its scheme.
pub fn require_scheme(options: &OptionSet) -> Result<&str, BuildError> {
    options.scheme().ok_or_else(|| {
        fail(BuildError::Precondition(
            "Must provide a scheme with -S/--scheme when building a workspace".to_string(),
        ))
    })
}

/// After a direct build, at least one `.app` bundle must have been produced.
pub fn require_app_bundles(apps: &[PathBuf], products_dir: &Path) -> Result<(), BuildError> {
    if apps.is_empty() {
        return Err(fail(BuildError::MissingOutput(format!(
            "Build produced no .app bundle in {}, cannot package an IPA.\n\n\
             Re-run with --debug to see the full xcodebuild invocation and keep the scratch directory.",
            products_dir.display()
        ))));
    }
    Ok(())
}

/// Before export, the archive produced by `xcodebuild archive` must exist.
pub fn require_archive_bundle(archive: &Path) -> Result<(), BuildError> {
    if !archive.exists() {
        return Err(fail(BuildError::MissingOutput(format!(
            "Build produced no .xcarchive at {}, cannot export an IPA.",
            archive.display()
        ))));
    }
    Ok(())
}

/// After packaging or export, the temporary IPA must be on disk.
pub fn require_artifact(ipa: &Path) -> Result<(), BuildError> {
    if !ipa.is_file() {
        return Err(fail(BuildError::MissingOutput(format!(
            "Archive failed: no IPA was written to {}",
            ipa.display()
        ))));
    }
    Ok(())
}
