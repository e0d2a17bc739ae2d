//! Pattern checks for rendered manifests that run as root or privileged.

use crate::kustomize::{default_targets, Kustomize};
use crate::{LintOutcome, Linter};

use pipeline_core::{Config, Error, Result};

use async_trait::async_trait;
use futures::future::join_all;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

static ROOT_USER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"runAsUser:\s*0\b").expect("pattern compiles"));
static NON_ROOT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"runAsNonRoot:\s*true\b").expect("pattern compiles"));
static PRIVILEGED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bprivileged:\s*true\b").expect("pattern compiles"));

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    /// Overlay or manifest file the finding belongs to.
    pub source: String,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {}: {}", self.source, self.message)
    }
}

pub fn scan_manifest(source: &str, content: &str) -> Vec<Finding> {
    let finding = |severity, message: &str| Finding {
        source: source.to_string(),
        severity,
        message: message.to_string(),
    };
    let mut findings = Vec::new();

    if ROOT_USER_RE.is_match(content) {
        findings.push(finding(Severity::Error, "container runs as root (runAsUser: 0)"));
    }
    if !NON_ROOT_RE.is_match(content) {
        findings.push(finding(Severity::Warning, "runAsNonRoot: true not set"));
    }
    if PRIVILEGED_RE.is_match(content) {
        findings.push(finding(Severity::Error, "privileged container"));
    }
    findings
}

/// Scans every `*.yaml` file directly inside `dir`.
pub async fn scan_directory(dir: &Path) -> Result<Vec<Finding>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|err| Error::io(dir, err))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|err| Error::io(dir, err))? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "yaml") {
            files.push(path);
        }
    }
    files.sort();

    let mut findings = Vec::new();
    for path in files {
        let content = tokio::fs::read_to_string(&path).await.map_err(|err| Error::io(&path, err))?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        findings.extend(scan_manifest(&name, &content));
    }
    Ok(findings)
}

pub fn has_errors(findings: &[Finding]) -> bool {
    findings.iter().any(|finding| finding.severity == Severity::Error)
}

/// Renders every overlay and scans the result.
pub struct SecurityLinter {
    config: Config,
    kustomize: Kustomize,
}

impl SecurityLinter {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            kustomize: Kustomize::from_config(config),
        }
    }
}

#[async_trait]
impl Linter for SecurityLinter {
    fn name(&self) -> &str {
        "security"
    }

    async fn run(&self, root: &Path, paths: &[PathBuf]) -> Result<LintOutcome> {
        let targets: Vec<PathBuf> = if paths.is_empty() {
            default_targets(&self.config)
                .await?
                .into_iter()
                .filter(|target| target.starts_with(&self.config.overlays_dir))
                .collect()
        } else {
            paths.to_vec()
        };

        let rendered = join_all(targets.iter().map(|target| self.kustomize.build(root, target))).await;
        let mut findings = Vec::new();
        for (target, result) in targets.iter().zip(rendered) {
            let source = target.file_name().map_or_else(
                || target.display().to_string(),
                |name| name.to_string_lossy().into_owned(),
            );
            findings.extend(scan_manifest(&source, &result?));
        }

        for finding in &findings {
            warn!("{}", finding);
        }
        let output = findings.iter().sorted_by_key(|f| std::cmp::Reverse(f.severity)).join("\n");
        if has_errors(&findings) {
            let errors = findings.iter().filter(|f| f.severity == Severity::Error).count();
            Ok(LintOutcome::failed(
                self.name(),
                format!("{output}\nFound {errors} security issue(s)").trim(),
            ))
        } else {
            info!("Security scan passed for {} overlay(s)", targets.len());
            Ok(LintOutcome::passed(self.name(), output))
        }
    }
}
