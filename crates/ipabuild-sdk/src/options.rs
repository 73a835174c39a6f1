//! Build options for a single IPA build.
//!
//! [`OptionSet`] is constructed once by the caller (usually the CLI) and is
//! never mutated by the pipeline. Values that are `None` or blank are treated
//! as absent everywhere: no flag is emitted for them.

use std::path::{Path, PathBuf};

use crate::types::{BuildError, BuildMode};
use crate::validate::fail;

/// Ordered `KEY=VALUE` build settings passed through to xcodebuild.
///
/// Keys are unique. Re-inserting a key replaces its value in place, keeping
/// the position of the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomSettings {
    entries: Vec<(String, String)>,
}

impl CustomSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `KEY=VALUE` arguments. The value may itself contain `=`.
    pub fn parse<I, S>(args: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut settings = Self::new();
        for arg in args {
            let arg = arg.as_ref();
            match arg.split_once('=') {
                Some((key, value)) if is_setting_key(key.trim()) => {
                    settings.insert(key.trim(), value);
                }
                Some((key, _)) if !key.trim().is_empty() => {
                    return Err(fail(BuildError::Precondition(format!(
                        "Invalid build setting name '{}'.\n\n\
                         Setting names may only contain letters, digits and underscores, \
                         and must not start with a digit.",
                        key.trim()
                    ))));
                }
                _ => {
                    return Err(fail(BuildError::Precondition(format!(
                        "Invalid build setting '{}'.\n\n\
                         Custom build settings must be passed as KEY=VALUE, e.g. \
                         CODE_SIGN_IDENTITY='iPhone Distribution'.",
                        arg
                    ))));
                }
            }
        }
        Ok(settings)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validated build configuration for one run.
///
/// # Example
///
/// ```
/// use ipabuild_sdk::{BuildMode, OptionSet};
///
/// let options = OptionSet {
///     scheme: Some("App".to_string()),
///     workspace: true,
///     ..OptionSet::new("ios/App.xcworkspace", "build_ipa")
/// };
/// assert_eq!(options.mode(), BuildMode::Direct);
/// ```
#[derive(Debug, Clone)]
pub struct OptionSet {
    /// Directory holding the project/workspace, or the bundle itself.
    pub build_dir: PathBuf,
    /// `-configuration`
    pub configuration: Option<String>,
    /// `-target`
    pub target: Option<String>,
    /// `-scheme`; required when building a workspace.
    pub scheme: Option<String>,
    /// Provisioning profile name passed through to the toolchain.
    pub profile: Option<String>,
    /// `-destination`
    pub destination: Option<String>,
    /// Presence selects archive mode.
    pub archive_path: Option<String>,
    /// Overrides the synthesized final artifact name and names the archive.
    pub name: Option<String>,
    /// Where the final `.ipa` and `.app.dSYM` are written.
    pub output_dir: PathBuf,
    /// User-supplied `KEY=VALUE` build settings.
    pub custom_settings: CustomSettings,
    /// Build an `.xcworkspace` instead of an `.xcodeproj`.
    pub workspace: bool,
    /// Publish the final IPA after a successful build.
    pub publish: bool,
    /// Upload the dSYM mapping file after a successful build.
    pub mapping: bool,
    /// Release notes sent along with a publish.
    pub changelog: Option<String>,
    /// Echo raw commands and keep scratch artifacts for inspection.
    pub debug: bool,
}

impl OptionSet {
    /// Creates options with every optional value unset.
    pub fn new(build_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            configuration: None,
            target: None,
            scheme: None,
            profile: None,
            destination: None,
            archive_path: None,
            name: None,
            output_dir: output_dir.into(),
            custom_settings: CustomSettings::new(),
            workspace: false,
            publish: false,
            mapping: false,
            changelog: None,
            debug: false,
        }
    }

    /// Exactly one mode per run, decided only by `archive_path`.
    pub fn mode(&self) -> BuildMode {
        if present(&self.archive_path).is_some() {
            BuildMode::Archive
        } else {
            BuildMode::Direct
        }
    }

    pub fn configuration(&self) -> Option<&str> {
        present(&self.configuration)
    }

    pub fn target(&self) -> Option<&str> {
        present(&self.target)
    }

    pub fn scheme(&self) -> Option<&str> {
        present(&self.scheme)
    }

    pub fn profile(&self) -> Option<&str> {
        present(&self.profile)
    }

    pub fn destination(&self) -> Option<&str> {
        present(&self.destination)
    }

    pub fn name(&self) -> Option<&str> {
        present(&self.name)
    }

    pub fn changelog(&self) -> Option<&str> {
        present(&self.changelog)
    }

    /// Base name of the `.xcarchive` written in archive mode.
    ///
    /// Falls back to the scheme, then the target, when no name was given.
    pub fn archive_name(&self) -> &str {
        self.name()
            .or_else(|| self.scheme())
            .or_else(|| self.target())
            .unwrap_or("Archive")
    }

    /// `<output_dir>/<archive_name>.xcarchive`
    pub fn archive_bundle_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.xcarchive", self.archive_name()))
    }

    /// Rejects options that would write outside `output_dir`.
    ///
    /// The override name becomes a file name (`<name>.ipa`, `<name>.xcarchive`),
    /// so it must not contain path separators or be `.`/`..`.
    pub fn validate(&self) -> Result<(), BuildError> {
        if let Some(name) = self.name()
            && (name.contains(['/', '\\']) || name == "." || name == "..")
        {
            return Err(fail(BuildError::Precondition(format!(
                "Invalid artifact name '{}'.\n\n\
                 --name is used as a file name inside the output directory and \
                 must not contain path separators.",
                name
            ))));
        }
        Ok(())
    }

    /// Directory the project lives in, even when `build_dir` names the bundle.
    pub fn project_dir(&self) -> &Path {
        let is_bundle = matches!(
            self.build_dir.extension().and_then(|e| e.to_str()),
            Some("xcodeproj") | Some("xcworkspace")
        );
        if is_bundle {
            self.build_dir.parent().unwrap_or(Path::new("."))
        } else {
            &self.build_dir
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the shape of an xcodebuild setting name.
pub fn is_setting_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
