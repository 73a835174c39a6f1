//! Configuration file support for ipabuild.
//!
//! Settings that rarely change between builds (output directory, distribution
//! endpoint, credentials) can live in an `ipabuild.toml` instead of being passed
//! on every invocation.
//!
//! ## Configuration File Location
//!
//! The file is searched for in the current directory and then each parent,
//! stopping at a repository root (a directory containing `.git`) or the
//! filesystem root.
//!
//! ## Example Configuration
//!
//! ```toml
//! [build]
//! output_dir = "build_ipa"
//! configuration = "Release"
//! scheme = "App"
//!
//! [distribution]
//! base_url = "https://dist.example.com/api"
//! project_id = "my-app"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "ipabuild.toml";

/// Root configuration structure for `ipabuild.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpabuildConfig {
    /// Build defaults.
    pub build: BuildDefaults,

    /// Distribution service used for publish and mapping upload.
    pub distribution: DistributionConfig,
}

/// Build defaults applied when the matching CLI flag is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildDefaults {
    /// Where final artifacts are written.
    ///
    /// Defaults to `<project dir>/build_ipa`.
    pub output_dir: Option<PathBuf>,

    /// Default `-configuration`.
    pub configuration: Option<String>,

    /// Default `-scheme`.
    pub scheme: Option<String>,
}

/// Distribution service settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// API root, e.g. `https://dist.example.com/api`.
    pub base_url: Option<String>,

    /// API token. Prefer `IPABUILD_TOKEN` over committing it here.
    pub token: Option<String>,

    /// Project identifier used for dSYM mapping uploads.
    pub project_id: Option<String>,
}

impl IpabuildConfig {
    /// Loads configuration from the specified file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: IpabuildConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Finds and loads `ipabuild.toml` from the current directory upward.
    ///
    /// Returns `Ok(None)` when no file exists, and an error when one exists but
    /// cannot be parsed.
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Finds and loads `ipabuild.toml` starting from `start_dir`.
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Generates a commented starter configuration.
    pub fn generate_starter_toml() -> String {
        r#"# ipabuild configuration file
# CLI flags override these settings when provided.

[build]
# Output directory for the final .ipa and .app.dSYM (default: <project dir>/build_ipa)
# output_dir = "build_ipa"

# Default build configuration (-configuration)
# configuration = "Release"

# Default scheme, required when building a workspace (-scheme)
# scheme = "App"

[distribution]
# Distribution API root used by --publish and --mapping
# base_url = "https://dist.example.com/api"

# Project identifier for dSYM mapping uploads
# project_id = "my-app"

# API token (prefer the IPABUILD_TOKEN environment variable or .env.local)
# token = ""
"#
        .to_string()
    }
}

/// Merges config file values with CLI arguments.
///
/// CLI arguments always take precedence over config file values.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded configuration, if any.
    pub config: Option<IpabuildConfig>,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Creates a resolver by discovering and loading configuration.
    pub fn new() -> Result<Self> {
        match IpabuildConfig::discover()? {
            Some((config, path)) => Ok(Self {
                config: Some(config),
                config_path: Some(path),
            }),
            None => Ok(Self::default()),
        }
    }

    /// Returns the CLI value if given, otherwise the config value.
    pub fn pick<T, F>(&self, cli_value: Option<T>, config_getter: F) -> Option<T>
    where
        F: FnOnce(&IpabuildConfig) -> Option<T>,
    {
        cli_value.or_else(|| self.config.as_ref().and_then(config_getter))
    }
}
