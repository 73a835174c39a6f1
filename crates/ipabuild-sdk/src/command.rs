//! Toolchain command synthesis.
//!
//! [`CommandBuilder`] turns an [`OptionSet`] into the single `xcodebuild`
//! invocation for the run. Every path or name value is single-quoted so it
//! survives spaces, and optional flags are omitted entirely when unset.
//!
//! Direct-build mode:
//!
//! ```text
//! xcodebuild build -sdk iphoneos -project '<proj>' [-configuration '<c>'] [-target '<t>']
//!     [-destination '<d>'] [-exportProvisioningProfile '<p>'] [K='V' ...]
//!     TARGET_BUILD_DIR='<tmp>' CONFIGURATION_BUILD_DIR='<tmp>' DWARF_DSYM_FOLDER_PATH='<out>' 2>&1
//! ```
//!
//! Archive mode replaces the base with
//! `xcodebuild archive -sdk iphoneos -archivePath '<out>/<name>.xcarchive'`, never
//! injects the build-directory defaults and never passes the profile at build time.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::options::{CustomSettings, OptionSet};
use crate::types::{BuildError, BuildMode};
use crate::validate::{self, FileKind};

pub const TARGET_BUILD_DIR: &str = "TARGET_BUILD_DIR";
pub const CONFIGURATION_BUILD_DIR: &str = "CONFIGURATION_BUILD_DIR";
pub const DWARF_DSYM_FOLDER_PATH: &str = "DWARF_DSYM_FOLDER_PATH";

/// A shell command line assembled token by token.
///
/// Tokens are stored already rendered; [`ShellCommand::to_string`] joins them
/// with single spaces, so an omitted flag never leaves stray whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    tokens: Vec<String>,
    merge_stderr: bool,
    current_dir: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(program: &str) -> Self {
        Self {
            tokens: vec![program.to_string()],
            merge_stderr: false,
            current_dir: None,
        }
    }

    /// Appends a literal token (flags, fixed keywords).
    pub fn arg(&mut self, token: &str) -> &mut Self {
        self.tokens.push(token.to_string());
        self
    }

    pub fn args<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) -> &mut Self {
        for token in tokens {
            self.arg(token);
        }
        self
    }

    /// Appends a single-quoted value.
    pub fn value(&mut self, value: impl AsRef<str>) -> &mut Self {
        self.tokens.push(shell_quote(value.as_ref()));
        self
    }

    /// Appends `flag 'value'`.
    pub fn flag(&mut self, flag: &str, value: impl AsRef<str>) -> &mut Self {
        self.arg(flag).value(value)
    }

    /// Appends `flag 'value'` only when a value is present.
    pub fn flag_if(&mut self, flag: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.flag(flag, value);
        }
        self
    }

    /// Appends `KEY='value'`.
    pub fn setting(&mut self, key: &str, value: impl AsRef<str>) -> &mut Self {
        self.tokens
            .push(format!("{}={}", key, shell_quote(value.as_ref())));
        self
    }

    /// Folds stderr into the captured stdout stream (`2>&1`).
    pub fn merge_stderr(&mut self) -> &mut Self {
        self.merge_stderr = true;
        self
    }

    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn program(&self) -> &str {
        &self.tokens[0]
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" "))?;
        if self.merge_stderr {
            write!(f, " 2>&1")?;
        }
        Ok(())
    }
}

/// Wraps a value in single quotes, escaping embedded quotes as `'\''`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Synthesizes the xcodebuild invocation for one run.
pub struct CommandBuilder<'a> {
    options: &'a OptionSet,
    scratch_dir: &'a Path,
}

impl<'a> CommandBuilder<'a> {
    /// `scratch_dir` receives build products in direct-build mode.
    pub fn new(options: &'a OptionSet, scratch_dir: &'a Path) -> Self {
        Self {
            options,
            scratch_dir,
        }
    }

    /// Builds the command, resolving the project or workspace on disk first.
    ///
    /// Fails if the project/workspace cannot be found, or if a workspace build
    /// has no scheme.
    pub fn build(&self) -> Result<ShellCommand, BuildError> {
        let options = self.options;
        let mode = options.mode();

        let mut cmd = ShellCommand::new("xcodebuild");
        match mode {
            BuildMode::Direct => {
                cmd.args(["build", "-sdk", "iphoneos"]);
            }
            BuildMode::Archive => {
                cmd.args(["archive", "-sdk", "iphoneos"])
                    .flag("-archivePath", path_str(&options.archive_bundle_path()));
            }
        }

        if options.workspace {
            let workspace = validate::find_project_file(&options.build_dir, FileKind::Workspace)?;
            let scheme = validate::require_scheme(options)?;
            cmd.flag("-workspace", path_str(&workspace))
                .flag("-scheme", scheme);
        } else {
            let project = validate::find_project_file(&options.build_dir, FileKind::Project)?;
            cmd.flag("-project", path_str(&project));
        }

        cmd.flag_if("-configuration", options.configuration())
            .flag_if("-target", options.target())
            .flag_if("-destination", options.destination());

        if mode == BuildMode::Direct {
            cmd.flag_if("-exportProvisioningProfile", options.profile());
        }

        for (key, value) in self.effective_settings().iter() {
            cmd.setting(key, value);
        }

        cmd.merge_stderr();
        Ok(cmd)
    }

    /// User settings merged with the implicit defaults. User keys always win.
    pub fn effective_settings(&self) -> CustomSettings {
        let user = &self.options.custom_settings;
        let mut settings = user.clone();

        if self.options.mode() == BuildMode::Direct {
            let scratch = path_str(self.scratch_dir);
            for key in [TARGET_BUILD_DIR, CONFIGURATION_BUILD_DIR] {
                if !user.contains_key(key) {
                    settings.insert(key, scratch.clone());
                }
            }
        }
        if !user.contains_key(DWARF_DSYM_FOLDER_PATH) {
            settings.insert(DWARF_DSYM_FOLDER_PATH, path_str(&self.options.output_dir));
        }
        settings
    }
}

/// `zip -qr '<ipa>' Payload`, run inside `staging_dir`.
pub fn package_command(staging_dir: &Path, ipa_path: &Path) -> ShellCommand {
    let mut cmd = ShellCommand::new("zip");
    cmd.arg("-qr")
        .value(path_str(ipa_path))
        .arg("Payload")
        .merge_stderr()
        .current_dir(staging_dir);
    cmd
}

/// `xcodebuild -exportArchive` for the archive produced in archive mode.
pub fn export_command(options: &OptionSet, ipa_path: &Path) -> ShellCommand {
    let mut cmd = ShellCommand::new("xcodebuild");
    cmd.args(["-exportArchive", "-exportFormat", "IPA"])
        .flag_if("-exportProvisioningProfile", options.profile())
        .flag("-archivePath", path_str(&options.archive_bundle_path()))
        .flag("-exportPath", path_str(ipa_path))
        .merge_stderr();
    cmd
}

pub(crate) fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
