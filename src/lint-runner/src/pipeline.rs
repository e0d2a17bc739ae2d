use crate::command::{CommandLinter, MarkdownLinter};
use crate::kustomize::KustomizeLinter;
use crate::security::SecurityLinter;
use crate::{LintOutcome, Linter};

use pipeline_core::Config;

use futures::future::join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Groups of checks that can be selected on their own.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LinterKind {
    Yaml,
    Python,
    Markdown,
    Kustomize,
    Security,
}

impl LinterKind {
    pub const ALL: [LinterKind; 5] = [
        LinterKind::Yaml,
        LinterKind::Python,
        LinterKind::Markdown,
        LinterKind::Kustomize,
        LinterKind::Security,
    ];

    fn linters(self, config: &Config) -> Vec<Box<dyn Linter>> {
        match self {
            LinterKind::Yaml => vec![Box::new(CommandLinter::yamllint())],
            LinterKind::Python => vec![
                Box::new(CommandLinter::ruff_check()),
                Box::new(CommandLinter::ruff_format()),
            ],
            LinterKind::Markdown => vec![Box::<MarkdownLinter>::default()],
            LinterKind::Kustomize => vec![Box::new(KustomizeLinter::new(config))],
            LinterKind::Security => vec![Box::new(SecurityLinter::new(config))],
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub parallel: bool,
    pub outcomes: Vec<LintOutcome>,
    /// Linters not run because an earlier one failed.
    pub skipped: Vec<String>,
}

impl PipelineReport {
    pub fn passed(&self) -> bool {
        self.skipped.is_empty() && self.outcomes.iter().all(|outcome| outcome.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &LintOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.passed)
    }
}

#[derive(Default)]
pub struct Pipeline {
    linters: Vec<Box<dyn Linter>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_kinds(config: &Config, kinds: &[LinterKind]) -> Self {
        Self {
            linters: kinds.iter().flat_map(|kind| kind.linters(config)).collect(),
        }
    }

    pub fn with(mut self, linter: impl Linter + 'static) -> Self {
        self.linters.push(Box::new(linter));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.linters.iter().map(|linter| linter.name()).collect()
    }

    /// Runs linters in order and stops at the first one that does not pass.
    pub async fn run_sequential(&self, root: &Path, paths: &[PathBuf]) -> PipelineReport {
        let mut outcomes = Vec::new();
        let mut skipped = Vec::new();

        for linter in &self.linters {
            if outcomes.last().map_or(false, |outcome: &LintOutcome| !outcome.passed) {
                skipped.push(linter.name().to_string());
                continue;
            }
            outcomes.push(run_one(linter.as_ref(), root, paths).await);
        }

        if !skipped.is_empty() {
            warn!("Skipped {} linter(s) after a failure: {}", skipped.len(), skipped.join(", "));
        }
        PipelineReport {
            parallel: false,
            outcomes,
            skipped,
        }
    }

    /// Runs every linter concurrently and reports all of them.
    pub async fn run_parallel(&self, root: &Path, paths: &[PathBuf]) -> PipelineReport {
        let outcomes = join_all(self.linters.iter().map(|linter| run_one(linter.as_ref(), root, paths))).await;
        PipelineReport {
            parallel: true,
            outcomes,
            skipped: Vec::new(),
        }
    }
}

async fn run_one(linter: &dyn Linter, root: &Path, paths: &[PathBuf]) -> LintOutcome {
    info!("Running {}", linter.name());
    match linter.run(root, paths).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("{} could not run: {}", linter.name(), err);
            LintOutcome::from_error(linter.name(), &err)
        }
    }
}
