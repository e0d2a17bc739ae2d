//! # css-kustomize
//!
//! Automation for the Community Solid Server Kustomize overlays.
//!
//! - `css-kustomize version validate|report|update` - image tag and version label consistency
//! - `css-kustomize lint` - yamllint, ruff, mdformat, kustomize and security checks
//! - `css-kustomize generate` - render overlays into `manifests/`
//! - `css-kustomize ci` - lint, generate, then scan the generated manifests

use anyhow::Result;
use clap::{Parser, Subcommand};
use pipeline_core::{
    telemetry::{self, LogFormat},
    Config,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

mod commands;

use commands::{CiArgs, GenerateArgs, LintArgs, VersionCommand};

/// Version, lint and generation tooling for Kustomize overlays
#[derive(Parser)]
#[command(name = "css-kustomize")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project root containing `overlays/` (defaults to CSS_KUSTOMIZE_ROOT, then `.`)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Image whose tag carries the application version
    #[arg(long, global = true, value_name = "NAME")]
    image: Option<String>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "CSS_KUSTOMIZE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (text, json)
    #[arg(long, global = true, env = "CSS_KUSTOMIZE_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Image tag and version label management
    #[command(name = "version")]
    Version {
        #[command(subcommand)]
        command: VersionCommand,
    },

    /// Run linters and validation checks
    #[command(name = "lint")]
    Lint(LintArgs),

    /// Render overlays into manifest files
    #[command(name = "generate")]
    Generate(GenerateArgs),

    /// Lint, generate and scan the generated manifests
    #[command(name = "ci")]
    Ci(CiArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = telemetry::init(&cli.log_level, cli.log_format) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let json = cli.json;
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            if json {
                commands::print_error_json(&err);
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::try_default()?;
    if let Some(root) = cli.root {
        config = config.with_root(root);
    }
    if let Some(image) = cli.image {
        config = config.with_image(image)?;
    }
    debug!("Using {:?}", config);

    match cli.command {
        Commands::Version { command } => commands::version::handle_command(command, &config, cli.json).await,
        Commands::Lint(args) => commands::pipeline::lint(args, &config, cli.json).await,
        Commands::Generate(args) => commands::pipeline::generate(args, config, cli.json).await,
        Commands::Ci(args) => commands::pipeline::ci(args, config, cli.json).await,
    }
}
