use super::{exit_code, print_json};

use overlay_versions::{check, report, update, ConsistencyPolicy, VersionUpdateRequest};
use pipeline_core::Config;

use anyhow::Result;
use clap::Subcommand;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Subcommand)]
pub enum VersionCommand {
    /// Check that image tag and version label agree in every overlay
    Validate {
        /// `matching` requires equal values, `independent` only well formed ones
        #[arg(long, default_value = "matching")]
        policy: ConsistencyPolicy,

        /// Version labels must carry under `independent`; defaults to pyproject.toml
        #[arg(long, value_name = "VERSION", env = "CSS_KUSTOMIZE_PROJECT_VERSION")]
        project_version: Option<String>,
    },

    /// Show instance, image tag and version label per overlay
    Report,

    /// Set image tag and version label to VERSION
    Update {
        /// Target version, X.Y.Z or X.Y.Z-prerelease
        #[arg(id = "target_version", value_name = "VERSION")]
        version: String,

        /// Only update this overlay
        #[arg(long, value_name = "NAME")]
        overlay: Option<String>,

        /// Show the changes without writing them
        #[arg(long)]
        dry_run: bool,

        /// Write nothing unless every overlay can be updated
        #[arg(long)]
        all_or_nothing: bool,

        /// Stop starting overlay writes after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
}

pub async fn handle_command(command: VersionCommand, config: &Config, json: bool) -> Result<ExitCode> {
    match command {
        VersionCommand::Validate {
            policy,
            project_version,
        } => {
            let config = match project_version {
                Some(version) => config.clone().with_project_version(version)?,
                None => config.clone(),
            };
            let outcome = check(&config, policy).await?;
            if json {
                print_json(&outcome)?;
            } else {
                print!("{}", report::render_validation(&outcome));
            }
            Ok(exit_code(outcome.overall_consistent))
        }
        VersionCommand::Report => {
            let outcome = check(config, ConsistencyPolicy::default()).await?;
            if json {
                print_json(&outcome.reports)?;
            } else {
                print!("{}", report::render_validation(&outcome));
            }
            Ok(ExitCode::SUCCESS)
        }
        VersionCommand::Update {
            version,
            overlay,
            dry_run,
            all_or_nothing,
            timeout,
        } => {
            let mut request = VersionUpdateRequest::new(version)
                .dry_run(dry_run)
                .all_or_nothing(all_or_nothing)
                .with_timeout(timeout.map(Duration::from_secs));
            if let Some(overlay) = overlay {
                request = request.for_overlay(overlay);
            }

            let outcome = update(config, &request).await?;
            if json {
                print_json(&outcome)?;
            } else {
                print!("{}", report::render_update(&outcome));
            }
            Ok(exit_code(outcome.is_success()))
        }
    }
}
