use crate::{Error, Result};

use std::path::{Path, PathBuf};

pub static DEFAULT_IMAGE: &str = "docker.io/solidproject/community-server";
pub static DEFAULT_OVERLAYS_DIR: &str = "overlays";
pub static DEFAULT_OUTPUT_DIR: &str = "manifests";
pub static VERSION_LABEL: &str = "app.kubernetes.io/version";
pub static INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub static DEFAULT_KUSTOMIZE_COMMAND: [&str; 2] = ["kubectl", "kustomize"];
pub const DEFAULT_CONCURRENCY: usize = 8;

pub static ROOT_ENV_VAR: &str = "CSS_KUSTOMIZE_ROOT";
pub static IMAGE_ENV_VAR: &str = "CSS_KUSTOMIZE_IMAGE";
pub static KUSTOMIZE_ENV_VAR: &str = "CSS_KUSTOMIZE_KUSTOMIZE";
pub static CONCURRENCY_ENV_VAR: &str = "CSS_KUSTOMIZE_CONCURRENCY";
pub static PROJECT_VERSION_ENV_VAR: &str = "CSS_KUSTOMIZE_PROJECT_VERSION";

/// Everything the tooling needs to know about the project it operates on.
///
/// The value is passed explicitly to every operation; nothing reads the
/// working directory behind the caller's back.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Project root containing the `overlays/` directory.
    pub root: PathBuf,
    pub overlays_dir: String,
    /// Image whose `newTag` is treated as the application version.
    pub image: String,
    pub version_label: String,
    pub instance_label: String,
    /// Program and leading arguments used to render an overlay.
    pub kustomize_command: Vec<String>,
    pub output_dir: PathBuf,
    /// Upper bound on per-overlay work in flight.
    pub concurrency: usize,
    /// Version the labels must carry under the independent policy.
    /// Read from `pyproject.toml` when unset.
    pub project_version: Option<String>,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            overlays_dir: DEFAULT_OVERLAYS_DIR.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            version_label: VERSION_LABEL.to_string(),
            instance_label: INSTANCE_LABEL.to_string(),
            kustomize_command: DEFAULT_KUSTOMIZE_COMMAND.iter().map(|s| s.to_string()).collect(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            concurrency: DEFAULT_CONCURRENCY,
            project_version: None,
        }
    }

    /// Builds a config from `CSS_KUSTOMIZE_*` environment variables,
    /// falling back to defaults rooted at `.`.
    pub fn try_default() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let root = lookup(ROOT_ENV_VAR).unwrap_or_else(|| ".".to_string());
        let mut config = Self::new(root);

        if let Some(image) = lookup(IMAGE_ENV_VAR) {
            config = config.with_image(image)?;
        }
        if let Some(command) = lookup(KUSTOMIZE_ENV_VAR) {
            config = config.with_kustomize_command(&command)?;
        }
        if let Some(concurrency) = lookup(CONCURRENCY_ENV_VAR) {
            let concurrency = concurrency.trim().parse::<usize>().map_err(|err| {
                Error::InvalidConfig(format!("{CONCURRENCY_ENV_VAR}={concurrency}: {err}"))
            })?;
            config = config.with_concurrency(concurrency)?;
        }
        if let Some(version) = lookup(PROJECT_VERSION_ENV_VAR) {
            config = config.with_project_version(version)?;
        }

        Ok(config)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Result<Self> {
        let image = image.into();
        if image.trim().is_empty() {
            return Err(Error::InvalidConfig("image name must not be empty".into()));
        }
        self.image = image;
        Ok(self)
    }

    /// Accepts a whitespace separated command line, e.g. `kustomize build`.
    pub fn with_kustomize_command(mut self, command: &str) -> Result<Self> {
        let parts = command.split_whitespace().map(str::to_string).collect::<Vec<_>>();
        if parts.is_empty() {
            return Err(Error::InvalidConfig("kustomize command must not be empty".into()));
        }
        self.kustomize_command = parts;
        Ok(self)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(Error::InvalidConfig("concurrency must be at least 1".into()));
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    pub fn with_project_version(mut self, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(Error::InvalidConfig("project version must not be empty".into()));
        }
        self.project_version = Some(version.trim().to_string());
        Ok(self)
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn overlays_path(&self) -> PathBuf {
        self.root.join(&self.overlays_dir)
    }

    pub fn overlay_path(&self, name: &str) -> PathBuf {
        self.overlays_path().join(name)
    }

    /// Output directory resolved against the project root unless absolute.
    pub fn output_path(&self) -> PathBuf {
        resolve(&self.root, &self.output_dir)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
