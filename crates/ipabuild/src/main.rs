use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use ipabuild_sdk::options::is_setting_key;
use ipabuild_sdk::{
    BuildError, CustomSettings, IpaInspector, MappingUploader, OptionSet, Pipeline, Publisher,
    ShellRunner,
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::{CONFIG_FILE_NAME, ConfigResolver, IpabuildConfig};
use distribution::DistributionClient;

mod config;
mod distribution;

/// Build an Xcode project or workspace into a named IPA.
#[derive(Parser, Debug)]
#[command(name = "ipabuild", author, version, about = "Xcode to IPA build orchestrator", long_about = None)]
struct Cli {
    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an IPA from a project or workspace.
    BuildIpa(BuildIpaArgs),
    /// Scaffold a starter ipabuild.toml.
    InitConfig {
        #[arg(long, default_value = CONFIG_FILE_NAME)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct BuildIpaArgs {
    /// Directory containing the .xcodeproj/.xcworkspace, or the bundle itself.
    build_dir: PathBuf,

    /// Extra build settings passed through to xcodebuild.
    #[arg(value_name = "KEY=VALUE", value_parser = parse_setting)]
    settings: Vec<String>,

    #[arg(short = 'C', long, help = "Build configuration, e.g. Release")]
    configuration: Option<String>,

    #[arg(short = 't', long)]
    target: Option<String>,

    #[arg(short = 'S', long, help = "Scheme to build (required with --workspace)")]
    scheme: Option<String>,

    #[arg(short = 'p', long, help = "Provisioning profile name")]
    profile: Option<String>,

    #[arg(short = 'D', long)]
    destination: Option<String>,

    #[arg(short = 'a', long, help = "Build via archive + export instead of a direct build")]
    archive_path: Option<String>,

    #[arg(short = 'n', long, help = "Final artifact name (default: <name>-<version>-build-<build>)")]
    name: Option<String>,

    #[arg(short = 'o', long, help = "Output directory (default: <project dir>/build_ipa)")]
    output: Option<PathBuf>,

    #[arg(short = 'w', long, help = "Build an .xcworkspace instead of an .xcodeproj")]
    workspace: bool,

    #[arg(short = 'P', long, help = "Publish the IPA after building")]
    publish: bool,

    #[arg(short = 'M', long, help = "Upload the dSYM mapping file after building")]
    mapping: bool,

    #[arg(long, help = "Release notes sent with --publish")]
    changelog: Option<String>,

    #[arg(long, help = "Project id for --mapping uploads")]
    project_id: Option<String>,

    #[arg(long, env = "IPABUILD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Echo raw commands and keep scratch files (also IPABUILD_DEBUG=1).
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    load_dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = match err.downcast_ref::<BuildError>() {
                Some(build_err) => {
                    if !build_err.is_logged() {
                        error!("{:#}", err);
                    }
                    build_err.exit_code()
                }
                None => {
                    error!("{:#}", err);
                    1
                }
            };
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::BuildIpa(args) => {
            let resolver = ConfigResolver::new()?;
            if let Some(path) = &resolver.config_path {
                debug!("Using config {}", path.display());
            }
            build_ipa(args, &resolver)
        }
        Command::InitConfig { output } => {
            ensure_can_write(&output)?;
            fs::write(&output, IpabuildConfig::generate_starter_toml())
                .with_context(|| format!("writing config to {:?}", output))?;
            info!("Wrote starter config to {}", output.display());
            Ok(())
        }
    }
}

fn build_ipa(args: BuildIpaArgs, resolver: &ConfigResolver) -> Result<()> {
    let client = distribution_client(&args, resolver)?;
    let options = build_options(args, resolver)?;

    let runner = ShellRunner::new().debug(options.debug);
    let inspector = IpaInspector::new();
    let mut pipeline = Pipeline::new(&options, &runner, &inspector);
    if let Some(client) = &client {
        if options.publish {
            pipeline = pipeline.publisher(client as &dyn Publisher);
        }
        if options.mapping {
            pipeline = pipeline.mapping_uploader(client as &dyn MappingUploader);
        }
    }

    let artifact = pipeline.run()?;
    debug!(
        "Built {} {} ({})",
        artifact.metadata.name, artifact.metadata.version, artifact.metadata.build
    );
    Ok(())
}

/// Merges CLI arguments over `ipabuild.toml` over built-in defaults.
fn build_options(args: BuildIpaArgs, resolver: &ConfigResolver) -> Result<OptionSet> {
    let build_dir = std::path::absolute(&args.build_dir)
        .with_context(|| format!("resolving build directory {:?}", args.build_dir))?;

    let config_output = resolver.pick(None, |c| {
        c.build.output_dir.clone().map(|dir| match &resolver.config_path {
            Some(path) if dir.is_relative() => {
                path.parent().unwrap_or(Path::new(".")).join(dir)
            }
            _ => dir,
        })
    });

    let mut options = OptionSet {
        configuration: resolver.pick(args.configuration, |c| c.build.configuration.clone()),
        target: args.target,
        scheme: resolver.pick(args.scheme, |c| c.build.scheme.clone()),
        profile: args.profile,
        destination: args.destination,
        archive_path: args.archive_path,
        name: args.name,
        custom_settings: CustomSettings::parse(&args.settings)?,
        workspace: args.workspace,
        publish: args.publish,
        mapping: args.mapping,
        changelog: args.changelog,
        debug: args.debug || debug_from_env(),
        ..OptionSet::new(build_dir, PathBuf::new())
    };

    options.output_dir = match args.output.or(config_output) {
        Some(dir) => std::path::absolute(&dir)
            .with_context(|| format!("resolving output directory {:?}", dir))?,
        None => options.project_dir().join("build_ipa"),
    };

    Ok(options)
}

/// Builds the distribution client when publish or mapping upload was requested.
fn distribution_client(
    args: &BuildIpaArgs,
    resolver: &ConfigResolver,
) -> Result<Option<DistributionClient>> {
    if !args.publish && !args.mapping {
        return Ok(None);
    }

    let base_url = resolver
        .pick(None, |c| c.distribution.base_url.clone())
        .ok_or_else(|| {
            anyhow!(
                "--publish/--mapping need a distribution endpoint.\n\n\
                 Set [distribution] base_url in {}.",
                CONFIG_FILE_NAME
            )
        })?;
    let token = resolver
        .pick(args.token.clone(), |c| c.distribution.token.clone())
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            anyhow!(
                "--publish/--mapping need an API token.\n\n\
                 Pass --token, set IPABUILD_TOKEN (or add it to .env.local)."
            )
        })?;
    let project_id = resolver.pick(args.project_id.clone(), |c| c.distribution.project_id.clone());
    if args.mapping && project_id.is_none() {
        bail!(
            "--mapping needs a project id.\n\n\
             Pass --project-id or set [distribution] project_id in {}.",
            CONFIG_FILE_NAME
        );
    }

    DistributionClient::new(base_url, token, project_id).map(Some)
}

fn parse_setting(raw: &str) -> Result<String, String> {
    match raw.split_once('=') {
        Some((key, _)) if is_setting_key(key.trim()) => Ok(raw.to_string()),
        Some((key, _)) if !key.trim().is_empty() => Err(format!(
            "'{}' is not a valid build setting name (letters, digits and underscores only)",
            key.trim()
        )),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn debug_from_env() -> bool {
    env::var("IPABUILD_DEBUG")
        .map(|v| {
            let v = v.trim();
            !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

fn init_logging(verbose: bool) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = if env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            let level = if verbose { "debug" } else { "info" };
            EnvFilter::new(format!(
                "ipabuild={level},ipabuild_sdk={level},reqwest=warn,hyper=warn"
            ))
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    });
}

fn load_dotenv() {
    if let Ok(cwd) = env::current_dir() {
        let _ = dotenvy::from_path(cwd.join(".env.local"));
    }
}

fn ensure_can_write(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing file: {:?}", path);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipabuild_sdk::BuildMode;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> BuildIpaArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::BuildIpa(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_build_ipa_flags_and_settings() {
        let args = parse(&[
            "ipabuild",
            "build-ipa",
            "ios",
            "CODE_SIGN_STYLE=Manual",
            "OTHER=a=b",
            "-w",
            "-S",
            "App",
            "-C",
            "Release",
            "-a",
            "yes",
            "-P",
            "--changelog",
            "fixes",
        ]);
        assert_eq!(args.build_dir, PathBuf::from("ios"));
        assert_eq!(args.settings, vec!["CODE_SIGN_STYLE=Manual", "OTHER=a=b"]);
        assert!(args.workspace);
        assert!(args.publish);
        assert!(!args.mapping);
        assert_eq!(args.scheme.as_deref(), Some("App"));
        assert_eq!(args.configuration.as_deref(), Some("Release"));
        assert_eq!(args.archive_path.as_deref(), Some("yes"));
        assert_eq!(args.changelog.as_deref(), Some("fixes"));
    }

    #[test]
    fn rejects_malformed_setting() {
        let result = Cli::try_parse_from(["ipabuild", "build-ipa", "ios", "NOT_A_SETTING"]);
        assert!(result.is_err());
        let result = Cli::try_parse_from(["ipabuild", "build-ipa", "ios", "=value"]);
        assert!(result.is_err());
        let result = Cli::try_parse_from(["ipabuild", "build-ipa", "ios", "A;rm -rf ~;B=1"]);
        assert!(result.is_err());
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["ipabuild", "build-ipa", "ios", "-v"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn default_output_is_next_to_project() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("App.xcodeproj");
        let args = parse(&["ipabuild", "build-ipa", project.to_str().unwrap()]);

        let options = build_options(args, &ConfigResolver::default()).unwrap();
        assert_eq!(options.output_dir, dir.path().join("build_ipa"));
        assert_eq!(options.mode(), BuildMode::Direct);
    }

    #[test]
    fn cli_overrides_config() {
        let dir = TempDir::new().unwrap();
        let mut config = IpabuildConfig::default();
        config.build.configuration = Some("Release".into());
        config.build.scheme = Some("App".into());
        config.build.output_dir = Some(PathBuf::from("dist"));
        let resolver = ConfigResolver {
            config: Some(config),
            config_path: Some(dir.path().join(CONFIG_FILE_NAME)),
        };

        let args = parse(&[
            "ipabuild",
            "build-ipa",
            dir.path().to_str().unwrap(),
            "-C",
            "Debug",
        ]);
        let options = build_options(args, &resolver).unwrap();
        assert_eq!(options.configuration.as_deref(), Some("Debug"));
        assert_eq!(options.scheme.as_deref(), Some("App"));
        assert_eq!(options.output_dir, dir.path().join("dist"));
    }

    #[test]
    fn publish_without_endpoint_fails() {
        let args = parse(&["ipabuild", "build-ipa", "ios", "-P", "--token", "t"]);
        let err = distribution_client(&args, &ConfigResolver::default()).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn mapping_requires_project_id() {
        let mut config = IpabuildConfig::default();
        config.distribution.base_url = Some("https://dist.example.com".into());
        let resolver = ConfigResolver {
            config: Some(config),
            config_path: None,
        };

        let args = parse(&["ipabuild", "build-ipa", "ios", "-M", "--token", "t"]);
        let err = distribution_client(&args, &resolver).unwrap_err();
        assert!(err.to_string().contains("project id"));

        let args = parse(&[
            "ipabuild",
            "build-ipa",
            "ios",
            "-M",
            "--token",
            "t",
            "--project-id",
            "app",
        ]);
        assert!(distribution_client(&args, &resolver).unwrap().is_some());
    }

    #[test]
    fn no_client_without_publish_or_mapping() {
        let args = parse(&["ipabuild", "build-ipa", "ios"]);
        assert!(
            distribution_client(&args, &ConfigResolver::default())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn init_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(ensure_can_write(&path).is_ok());
        fs::write(&path, "").unwrap();
        assert!(ensure_can_write(&path).is_err());
    }
}
