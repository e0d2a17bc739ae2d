use crate::{LintOutcome, Linter};

use pipeline_core::{Error, Result};

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directories never searched for lint targets.
static SKIPPED_DIRS: [&str; 5] = [".git", ".venv", "node_modules", "target", "manifests"];

/// Runs `program args...` in `root` and captures its output.
pub(crate) async fn run_tool(root: &Path, program: &str, args: &[String]) -> Result<Output> {
    debug!("Running {} {} in {}", program, args.join(" "), root.display());
    Command::new(program)
        .args(args)
        .current_dir(root)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound => Error::ToolNotFound(program.to_string()),
            _ => Error::io(root, err),
        })
}

pub(crate) fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{}\n{}", stdout.trim(), stderr.trim()).trim().to_string()
}

/// A linter that is an external program; a non-zero exit means findings.
#[derive(Clone, Debug)]
pub struct CommandLinter {
    name: String,
    program: String,
    args: Vec<String>,
    default_paths: Vec<String>,
}

impl CommandLinter {
    pub fn new(name: &str, program: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            default_paths: Vec::new(),
        }
    }

    pub fn with_default_paths(mut self, paths: &[&str]) -> Self {
        self.default_paths = paths.iter().map(|path| path.to_string()).collect();
        self
    }

    pub fn yamllint() -> Self {
        Self::new("yamllint", "yamllint", &["-s"]).with_default_paths(&["."])
    }

    pub fn ruff_check() -> Self {
        Self::new("ruff check", "ruff", &["check"]).with_default_paths(&["."])
    }

    pub fn ruff_format() -> Self {
        Self::new("ruff format", "ruff", &["format", "--check"]).with_default_paths(&["."])
    }
}

#[async_trait]
impl Linter for CommandLinter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, root: &Path, paths: &[PathBuf]) -> Result<LintOutcome> {
        let mut args = self.args.clone();
        if paths.is_empty() {
            args.extend(self.default_paths.iter().cloned());
        } else {
            args.extend(paths.iter().map(|path| path.display().to_string()));
        }

        let output = run_tool(root, &self.program, &args).await?;
        let text = combined_output(&output);
        if output.status.success() {
            info!("{} passed", self.name);
            Ok(LintOutcome::passed(&self.name, text))
        } else {
            warn!("{} failed with {}", self.name, output.status);
            Ok(LintOutcome::failed(&self.name, text))
        }
    }
}

/// `mdformat --check` over every Markdown file in the tree.
#[derive(Clone, Debug)]
pub struct MarkdownLinter {
    inner: CommandLinter,
}

impl Default for MarkdownLinter {
    fn default() -> Self {
        Self {
            inner: CommandLinter::new("mdformat", "mdformat", &["--check"]),
        }
    }
}

#[async_trait]
impl Linter for MarkdownLinter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, root: &Path, paths: &[PathBuf]) -> Result<LintOutcome> {
        let files = if paths.is_empty() {
            find_files(root, "md").await?
        } else {
            paths.to_vec()
        };
        if files.is_empty() {
            info!("No markdown files found to lint");
            return Ok(LintOutcome::passed(self.name(), "no markdown files found"));
        }

        debug!("Checking {} markdown file(s)", files.len());
        let outcome = self.inner.run(root, &files).await?;
        if outcome.passed {
            Ok(outcome)
        } else {
            let output = format!("{}\nRun 'mdformat .' to fix.", outcome.output);
            Ok(LintOutcome::failed(self.name(), output.trim()))
        }
    }
}

/// Files under `root` with the given extension, relative to `root`, sorted.
pub(crate) async fn find_files(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    let extension = extension.to_string();
    let walk_root = root.clone();

    tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        let walker = WalkDir::new(&walk_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !SKIPPED_DIRS.iter().any(|skipped| entry.file_name() == *skipped)
            });

        let mut found = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(walk_root.as_path()).to_path_buf();
                Error::io(path, err.into())
            })?;
            let matches = entry.path().extension().map_or(false, |ext| ext == extension.as_str());
            if !entry.file_type().is_file() || !matches {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&walk_root) {
                found.push(relative.to_path_buf());
            }
        }
        found.sort();
        Ok(found)
    })
    .await
    .map_err(|err| Error::io(root, std::io::Error::new(ErrorKind::Other, err)))?
}
