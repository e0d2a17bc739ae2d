use super::{exit_code, print_json};

use lint_runner::security::{has_errors, scan_directory};
use lint_runner::{LinterKind, Pipeline, PipelineReport};
use pipeline_core::Config;

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Args)]
pub struct LintArgs {
    /// Run only YAML linting
    #[arg(long, group = "only")]
    yaml_only: bool,

    /// Run only Python linting and format checks
    #[arg(long, group = "only")]
    python_only: bool,

    /// Run only Markdown format checks
    #[arg(long, group = "only")]
    markdown_only: bool,

    /// Run only Kustomize validation
    #[arg(long, group = "only")]
    kustomize_only: bool,

    /// Run only the security scan
    #[arg(long, group = "only")]
    security_only: bool,

    /// Run all selected linters at once instead of stopping at the first failure
    #[arg(long)]
    parallel: bool,
}

impl LintArgs {
    fn kinds(&self) -> Vec<LinterKind> {
        let selected = [
            (self.yaml_only, LinterKind::Yaml),
            (self.python_only, LinterKind::Python),
            (self.markdown_only, LinterKind::Markdown),
            (self.kustomize_only, LinterKind::Kustomize),
            (self.security_only, LinterKind::Security),
        ]
        .into_iter()
        .filter_map(|(flag, kind)| flag.then_some(kind))
        .collect::<Vec<_>>();

        if selected.is_empty() {
            LinterKind::ALL.to_vec()
        } else {
            selected
        }
    }
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Only render this overlay
    #[arg(long, value_name = "NAME")]
    overlay: Option<String>,

    /// Where to write `<overlay>.yaml` files
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Render overlays concurrently
    #[arg(long)]
    parallel: bool,
}

#[derive(Args)]
pub struct CiArgs {
    /// Where to write `<overlay>.yaml` files
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
}

fn render_lint(report: &PipelineReport) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        let state = if outcome.passed { "PASS" } else { "FAIL" };
        out.push_str(&format!("{state} {}\n", outcome.linter));
        if !outcome.passed {
            for line in outcome.output.lines() {
                out.push_str(&format!("    {line}\n"));
            }
        }
    }
    for skipped in &report.skipped {
        out.push_str(&format!("SKIP {skipped}\n"));
    }
    out
}

pub async fn lint(args: LintArgs, config: &Config, json: bool) -> Result<ExitCode> {
    let pipeline = Pipeline::for_kinds(config, &args.kinds());
    let report = if args.parallel {
        pipeline.run_parallel(&config.root, &[]).await
    } else {
        pipeline.run_sequential(&config.root, &[]).await
    };

    if json {
        print_json(&report)?;
    } else {
        print!("{}", render_lint(&report));
    }
    Ok(exit_code(report.passed()))
}

pub async fn generate(args: GenerateArgs, mut config: Config, json: bool) -> Result<ExitCode> {
    if let Some(output_dir) = args.output_dir {
        config = config.with_output_dir(output_dir);
    }

    let manifests = lint_runner::generate(&config, args.overlay.as_deref(), args.parallel).await?;
    if json {
        print_json(&manifests)?;
    } else {
        for manifest in &manifests {
            println!("{} -> {}", manifest.overlay, manifest.path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn ci(args: CiArgs, mut config: Config, json: bool) -> Result<ExitCode> {
    if let Some(output_dir) = args.output_dir {
        config = config.with_output_dir(output_dir);
    }

    let lint = Pipeline::for_kinds(&config, &LinterKind::ALL)
        .run_sequential(&config.root, &[])
        .await;
    if !lint.passed() {
        if json {
            print_json(&serde_json::json!({ "lint": lint }))?;
        } else {
            print!("{}", render_lint(&lint));
        }
        return Ok(ExitCode::FAILURE);
    }
    info!("Linting completed");

    let manifests = lint_runner::generate(&config, None, true)
        .await
        .context("manifest generation failed")?;
    info!("Manifest generation completed");

    let findings = scan_directory(&config.output_path()).await?;
    let passed = !has_errors(&findings);

    if json {
        print_json(&serde_json::json!({
            "lint": lint,
            "manifests": manifests,
            "findings": findings,
            "passed": passed,
        }))?;
    } else {
        print!("{}", render_lint(&lint));
        for manifest in &manifests {
            println!("{} -> {}", manifest.overlay, manifest.path.display());
        }
        for finding in &findings {
            println!("{finding}");
        }
    }
    Ok(exit_code(passed))
}
