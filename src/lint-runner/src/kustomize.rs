use crate::command::{combined_output, run_tool};
use crate::{LintOutcome, Linter};

use overlay_versions::discover;
use pipeline_core::{fs::atomic_write, Config, Error, Result};

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Renders kustomization directories with the configured command,
/// `kubectl kustomize` by default.
#[derive(Clone, Debug)]
pub struct Kustomize {
    command: Vec<String>,
}

impl Kustomize {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.kustomize_command.clone())
    }

    fn display(&self) -> String {
        self.command.join(" ")
    }

    /// Rendered manifests of `target`, a directory relative to `root`.
    pub async fn build(&self, root: &Path, target: &Path) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::InvalidConfig("kustomize command must not be empty".into()))?;
        let mut args = args.to_vec();
        args.push(target.display().to_string());

        let output = run_tool(root, program, &args).await?;
        if !output.status.success() {
            return Err(Error::ToolFailed {
                tool: format!("{} {}", self.display(), target.display()),
                status: output.status.to_string(),
                stderr: combined_output(&output),
            });
        }
        String::from_utf8(output.stdout)
            .map_err(|err| Error::DeserializationError(format!("{}: {err}", target.display())))
    }
}

/// `base/` when present, then every overlay directory.
pub(crate) async fn default_targets(config: &Config) -> Result<Vec<PathBuf>> {
    let mut targets = Vec::new();
    if tokio::fs::metadata(config.root.join("base")).await.map_or(false, |m| m.is_dir()) {
        targets.push(PathBuf::from("base"));
    }
    match discover(config).await {
        Ok(discovery) => targets.extend(
            discovery
                .names()
                .into_iter()
                .map(|name| Path::new(&config.overlays_dir).join(name)),
        ),
        Err(Error::OverlaysDirMissing(path)) => warn!("No overlays directory at {}", path.display()),
        Err(err) => return Err(err),
    }
    Ok(targets)
}

/// Fails when any kustomization in the project does not render.
pub struct KustomizeLinter {
    config: Config,
    kustomize: Kustomize,
}

impl KustomizeLinter {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            kustomize: Kustomize::from_config(config),
        }
    }
}

#[async_trait]
impl Linter for KustomizeLinter {
    fn name(&self) -> &str {
        "kustomize"
    }

    async fn run(&self, root: &Path, paths: &[PathBuf]) -> Result<LintOutcome> {
        let targets = if paths.is_empty() {
            default_targets(&self.config).await?
        } else {
            paths.to_vec()
        };

        let results = join_all(targets.iter().map(|target| self.kustomize.build(root, target))).await;

        let mut lines = Vec::new();
        let mut failed = 0;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(_) => lines.push(format!("ok {}", target.display())),
                Err(err @ Error::ToolNotFound(_)) => return Err(err),
                Err(err) => {
                    warn!("{} does not render: {}", target.display(), err);
                    failed += 1;
                    lines.push(format!("failed {}: {}", target.display(), err));
                }
            }
        }

        let output = lines.join("\n");
        if failed == 0 {
            info!("Kustomize validation passed for {} target(s)", targets.len());
            Ok(LintOutcome::passed(self.name(), output))
        } else {
            Ok(LintOutcome::failed(self.name(), output))
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedManifest {
    pub overlay: String,
    pub path: PathBuf,
    pub bytes: usize,
}

/// Renders one overlay, or all of them, into `config.output_path()` as
/// `<overlay>.yaml`.
pub async fn generate(config: &Config, overlay: Option<&str>, parallel: bool) -> Result<Vec<GeneratedManifest>> {
    let names = match overlay {
        Some(name) => {
            let is_dir = tokio::fs::metadata(config.overlay_path(name))
                .await
                .map_or(false, |metadata| metadata.is_dir());
            if !is_dir {
                return Err(Error::OverlayNotFound(name.to_string()));
            }
            vec![name.to_string()]
        }
        None => discover(config)
            .await?
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    };

    let output_dir = config.output_path();
    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(|err| Error::io(&output_dir, err))?;

    let kustomize = Kustomize::from_config(config);
    let manifests = if parallel {
        try_join_all(names.iter().map(|name| generate_one(config, &kustomize, name))).await?
    } else {
        let mut manifests = Vec::with_capacity(names.len());
        for name in &names {
            manifests.push(generate_one(config, &kustomize, name).await?);
        }
        manifests
    };

    info!("Generated {} manifest(s) in {}", manifests.len(), output_dir.display());
    Ok(manifests)
}

async fn generate_one(config: &Config, kustomize: &Kustomize, name: &str) -> Result<GeneratedManifest> {
    let target = Path::new(&config.overlays_dir).join(name);
    let rendered = kustomize.build(&config.root, &target).await?;
    let path = config.output_path().join(format!("{name}.yaml"));
    let bytes = rendered.len();

    let write_path = path.clone();
    tokio::task::spawn_blocking(move || atomic_write(&write_path, &rendered))
        .await
        .map_err(|err| Error::WriteFailure {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, err),
        })??;

    info!("Generated manifest {}", path.display());
    Ok(GeneratedManifest {
        overlay: name.to_string(),
        path,
        bytes,
    })
}
