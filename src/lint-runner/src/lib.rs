//! External checkers and manifest rendering for the overlay project.

use pipeline_core::{Error, Result};

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub mod command;
pub mod kustomize;
pub mod pipeline;
pub mod security;

pub use command::CommandLinter;
pub use kustomize::{generate, GeneratedManifest, Kustomize, KustomizeLinter};
pub use pipeline::{LinterKind, Pipeline, PipelineReport};
pub use security::{Finding, SecurityLinter, Severity};

/// A check run against the project tree.
///
/// `paths` are relative to `root`; an empty slice means the linter's own
/// default targets.
#[async_trait]
pub trait Linter: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, root: &Path, paths: &[PathBuf]) -> Result<LintOutcome>;
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LintOutcome {
    pub linter: String,
    pub passed: bool,
    /// Combined tool output, trimmed.
    pub output: String,
    /// Set when the linter could not run at all.
    pub error_kind: Option<String>,
}

impl LintOutcome {
    pub fn passed(linter: &str, output: impl Into<String>) -> Self {
        Self {
            linter: linter.to_string(),
            passed: true,
            output: output.into(),
            error_kind: None,
        }
    }

    pub fn failed(linter: &str, output: impl Into<String>) -> Self {
        Self {
            linter: linter.to_string(),
            passed: false,
            output: output.into(),
            error_kind: None,
        }
    }

    pub fn from_error(linter: &str, err: &Error) -> Self {
        Self {
            linter: linter.to_string(),
            passed: false,
            output: err.to_string(),
            error_kind: Some(err.kind_label().to_string()),
        }
    }
}
