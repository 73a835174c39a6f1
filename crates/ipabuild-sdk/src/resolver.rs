//! Locating the produced build output and turning it into a temporary IPA.
//!
//! Two mutually exclusive strategies, picked by [`BuildMode`]:
//!
//! - **Direct build**: scan the products directory for `.app` bundles, pick the
//!   largest, stage it under `Payload/` and zip it.
//! - **Archive**: run `xcodebuild -exportArchive` against
//!   `<output_dir>/<name>.xcarchive`.
//!
//! Both check their precondition artifact before running anything, and both
//! confirm the IPA exists afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{self, CONFIGURATION_BUILD_DIR};
use crate::context::BuildContext;
use crate::options::OptionSet;
use crate::runner::ProcessRunner;
use crate::types::{BuildError, BuildMode};
use crate::validate::{self, fail};

const DIVIDER_WIDTH: usize = 60;

/// Produces the temporary artifact for a finished toolchain run.
pub struct OutputResolver<'a, R: ProcessRunner + ?Sized> {
    options: &'a OptionSet,
    runner: &'a R,
}

impl<'a, R: ProcessRunner + ?Sized> OutputResolver<'a, R> {
    pub fn new(options: &'a OptionSet, runner: &'a R) -> Self {
        Self { options, runner }
    }

    /// Returns the path of the temporary IPA, confirmed to exist.
    pub fn resolve(&self, ctx: &BuildContext) -> Result<PathBuf, BuildError> {
        match self.options.mode() {
            BuildMode::Direct => self.package_build_output(ctx),
            BuildMode::Archive => self.export_archive(),
        }
    }

    /// Where xcodebuild put the `.app` bundles in direct-build mode.
    ///
    /// A relative `CONFIGURATION_BUILD_DIR` is relative to the project
    /// directory, as xcodebuild resolves it.
    pub fn products_dir(&self, ctx: &BuildContext) -> PathBuf {
        match self.options.custom_settings.get(CONFIGURATION_BUILD_DIR) {
            Some(dir) => self.options.project_dir().join(dir),
            None => ctx.scratch_dir().to_path_buf(),
        }
    }

    fn package_build_output(&self, ctx: &BuildContext) -> Result<PathBuf, BuildError> {
        let products_dir = self.products_dir(ctx);
        let apps = find_app_bundles(&products_dir)?;
        validate::require_app_bundles(&apps, &products_dir)?;

        let app = select_largest(&apps)?;
        if apps.len() > 1 {
            info!(
                "Found {} app bundles, packaging the largest: {}",
                apps.len(),
                app.display()
            );
        }

        archiving_banner();

        let staging = ctx.scratch_dir().join("package");
        let payload = staging.join("Payload");
        if payload.exists() {
            fs::remove_dir_all(&payload)?;
        }
        fs::create_dir_all(&payload)?;
        let bundle_name = app
            .file_name()
            .ok_or_else(|| {
                fail(BuildError::MissingOutput(format!(
                    "Invalid app bundle path: {}",
                    app.display()
                )))
            })?;
        copy_dir_recursive(&app, &payload.join(bundle_name))?;

        let temp_ipa = temp_ipa_path(ctx.scratch_dir())?;
        self.runner
            .run(&command::package_command(&staging, &temp_ipa))?;

        validate::require_artifact(&temp_ipa)?;
        Ok(temp_ipa)
    }

    fn export_archive(&self) -> Result<PathBuf, BuildError> {
        let archive = self.options.archive_bundle_path();
        validate::require_archive_bundle(&archive)?;

        archiving_banner();

        let temp_ipa = temp_ipa_path(&self.options.output_dir)?;
        self.runner
            .run(&command::export_command(self.options, &temp_ipa))?;

        validate::require_artifact(&temp_ipa)?;
        Ok(temp_ipa)
    }
}

fn archiving_banner() {
    info!("Archiving......");
    info!("{}", "-".repeat(DIVIDER_WIDTH));
}

/// A fresh `<unix seconds>-<random>.ipa` path in `dir` that names no existing
/// file. The toolchain creates the file itself.
pub(crate) fn temp_ipa_path(dir: &Path) -> Result<PathBuf, BuildError> {
    let reserved = tempfile::Builder::new()
        .prefix(&format!("{}-", time::OffsetDateTime::now_utc().unix_timestamp()))
        .suffix(".ipa")
        .tempfile_in(dir)?;
    let path = reserved.path().to_path_buf();
    reserved.close()?;
    Ok(path)
}

/// Lists `.app` bundles directly inside `dir`, sorted by path.
pub fn find_app_bundles(dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut apps: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_dir() && p.extension().and_then(|e| e.to_str()) == Some("app"))
        .collect();
    apps.sort();
    Ok(apps)
}

/// Picks the bundle with the largest on-disk size. A build can incidentally
/// yield extension or test bundles next to the real product.
pub fn select_largest(apps: &[PathBuf]) -> Result<PathBuf, BuildError> {
    let mut best: Option<(u64, &PathBuf)> = None;
    for app in apps {
        let size = bundle_size(app)?;
        match best {
            Some((current, _)) if current >= size => {}
            _ => best = Some((size, app)),
        }
    }
    best.map(|(_, app)| app.clone())
        .ok_or_else(|| fail(BuildError::MissingOutput("No app bundles to choose from".to_string())))
}

/// Total size in bytes of every file under `path`. Symlinks are not followed.
pub fn bundle_size(path: &Path) -> Result<u64, BuildError> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        total += bundle_size(&entry?.path())?;
    }
    Ok(total)
}

/// Recursively copies a bundle, recreating symlinks rather than following them.
pub(crate) fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), BuildError> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dest.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            copy_symlink(&path, &dest_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&path, &dest_path)?;
        } else {
            fs::copy(&path, &dest_path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<(), BuildError> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<(), BuildError> {
    fs::copy(src, dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ShellCommand;
    use crate::runner::RunOutput;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Records commands and writes a placeholder IPA for zip/export invocations.
    #[derive(Default)]
    struct RecordingRunner {
        commands: RefCell<Vec<ShellCommand>>,
        write_ipa: bool,
    }

    impl ProcessRunner for RecordingRunner {
        fn run(&self, command: &ShellCommand) -> Result<RunOutput, BuildError> {
            self.commands.borrow_mut().push(command.clone());
            if self.write_ipa {
                let line = command.to_string();
                let ipa = line
                    .split('\'')
                    .find(|part| part.ends_with(".ipa"))
                    .map(PathBuf::from);
                if let Some(ipa) = ipa {
                    fs::write(ipa, b"PK").unwrap();
                }
            }
            Ok(RunOutput {
                status: Some(0),
                output: String::new(),
            })
        }
    }

    fn make_app(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let app = dir.join(name);
        fs::create_dir_all(app.join("Frameworks")).unwrap();
        fs::write(app.join("Info.plist"), vec![b'x'; 10]).unwrap();
        fs::write(app.join("Frameworks/bin"), vec![b'x'; bytes]).unwrap();
        app
    }

    #[test]
    fn selects_exactly_the_largest_bundle() {
        let dir = TempDir::new().unwrap();
        let small = make_app(dir.path(), "A.app", 10);
        let large = make_app(dir.path(), "Z-Long-Name.app", 5000);
        let medium = make_app(dir.path(), "M.app", 500);
        let picked = select_largest(&[small, large.clone(), medium]).unwrap();
        assert_eq!(picked, large);
    }

    #[test]
    fn finds_only_app_directories() {
        let dir = TempDir::new().unwrap();
        make_app(dir.path(), "B.app", 1);
        make_app(dir.path(), "A.app", 1);
        fs::create_dir(dir.path().join("A.app.dSYM")).unwrap();
        fs::write(dir.path().join("stray.app"), b"file").unwrap();
        let apps = find_app_bundles(dir.path()).unwrap();
        assert_eq!(apps, vec![dir.path().join("A.app"), dir.path().join("B.app")]);
    }

    #[test]
    fn direct_mode_packages_largest_bundle() {
        let scratch = TempDir::new().unwrap();
        make_app(scratch.path(), "Small.app", 1);
        make_app(scratch.path(), "Real.app", 4096);
        let ctx = BuildContext::with_scratch_dir(scratch.path(), true);
        let options = OptionSet::new("/src", "/out");
        let runner = RecordingRunner {
            write_ipa: true,
            ..Default::default()
        };

        let ipa = OutputResolver::new(&options, &runner).resolve(&ctx).unwrap();

        assert!(ipa.is_file());
        assert_eq!(ipa.parent(), Some(scratch.path()));
        let staged = scratch.path().join("package/Payload");
        assert!(staged.join("Real.app/Frameworks/bin").is_file());
        assert!(!staged.join("Small.app").exists());
        let commands = runner.commands.borrow();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].program(), "zip");
    }

    #[test]
    fn direct_mode_without_apps_runs_nothing() {
        let scratch = TempDir::new().unwrap();
        let ctx = BuildContext::with_scratch_dir(scratch.path(), true);
        let options = OptionSet::new("/src", "/out");
        let runner = RecordingRunner::default();

        let err = OutputResolver::new(&options, &runner)
            .resolve(&ctx)
            .unwrap_err();

        assert!(matches!(err, BuildError::MissingOutput(_)));
        assert!(runner.commands.borrow().is_empty());
    }

    #[test]
    fn packaging_that_writes_nothing_fails() {
        let scratch = TempDir::new().unwrap();
        make_app(scratch.path(), "App.app", 1);
        let ctx = BuildContext::with_scratch_dir(scratch.path(), true);
        let options = OptionSet::new("/src", "/out");
        let runner = RecordingRunner::default();

        let err = OutputResolver::new(&options, &runner)
            .resolve(&ctx)
            .unwrap_err();
        assert!(err.to_string().contains("Archive failed"));
    }

    #[test]
    fn user_configuration_build_dir_is_scanned() {
        let scratch = TempDir::new().unwrap();
        let products = TempDir::new().unwrap();
        make_app(products.path(), "App.app", 1);
        let ctx = BuildContext::with_scratch_dir(scratch.path(), true);
        let mut options = OptionSet::new("/src", "/out");
        options
            .custom_settings
            .insert(CONFIGURATION_BUILD_DIR, products.path().to_string_lossy());
        let runner = RecordingRunner {
            write_ipa: true,
            ..Default::default()
        };

        let resolver = OutputResolver::new(&options, &runner);
        assert_eq!(resolver.products_dir(&ctx), products.path());
        assert!(resolver.resolve(&ctx).is_ok());
    }

    #[test]
    fn relative_configuration_build_dir_is_project_relative() {
        let project = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        make_app(&project.path().join("build/Release"), "App.app", 1);
        let ctx = BuildContext::with_scratch_dir(scratch.path(), true);
        let mut options = OptionSet::new(project.path().join("App.xcodeproj"), "/out");
        options
            .custom_settings
            .insert(CONFIGURATION_BUILD_DIR, "build/Release");
        let runner = RecordingRunner {
            write_ipa: true,
            ..Default::default()
        };

        let resolver = OutputResolver::new(&options, &runner);
        assert_eq!(
            resolver.products_dir(&ctx),
            project.path().join("build/Release")
        );
        assert!(resolver.resolve(&ctx).is_ok());
    }

    #[test]
    fn temp_ipa_never_names_an_existing_file() {
        let out = TempDir::new().unwrap();
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let existing = out.path().join(format!("{}.ipa", now));
        fs::write(&existing, b"keep me").unwrap();

        let a = temp_ipa_path(out.path()).unwrap();
        let b = temp_ipa_path(out.path()).unwrap();

        assert_ne!(a, b);
        for path in [&a, &b] {
            assert_ne!(path, &existing);
            assert_eq!(path.parent(), Some(out.path()));
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("ipa"));
            assert!(!path.exists());
        }
        assert_eq!(fs::read(&existing).unwrap(), b"keep me");
    }

    #[test]
    fn archive_mode_requires_archive_before_export() {
        let out = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let ctx = BuildContext::with_scratch_dir(scratch.path(), true);
        let mut options = OptionSet::new("/src", out.path());
        options.archive_path = Some("1".into());
        options.name = Some("App".into());
        let runner = RecordingRunner {
            write_ipa: true,
            ..Default::default()
        };

        let err = OutputResolver::new(&options, &runner)
            .resolve(&ctx)
            .unwrap_err();
        assert!(err.to_string().contains(".xcarchive"));
        assert!(runner.commands.borrow().is_empty());

        fs::create_dir(out.path().join("App.xcarchive")).unwrap();
        let ipa = OutputResolver::new(&options, &runner).resolve(&ctx).unwrap();
        assert_eq!(ipa.parent(), Some(out.path()));
        assert!(ipa.is_file());
        let commands = runner.commands.borrow();
        assert!(commands[0].to_string().starts_with("xcodebuild -exportArchive"));
    }
}
