//! Version Consistency Engine for Kustomize overlays.
//!
//! Keeps the application image tag and the `app.kubernetes.io/version` label
//! of every `overlays/<name>/kustomization.yaml` in agreement.

mod edit;
mod kustomization;

pub mod consistency;
pub mod discovery;
pub mod model;
pub mod project;
pub mod report;
pub mod update;

pub use consistency::{validate, validate_against};
pub use discovery::discover;
pub use model::*;
pub use project::project_version;
pub use update::{apply, update};

use pipeline_core::{Config, Result};

/// Discovers the overlays under `config.root` and validates them. The
/// independent policy also holds labels to the project version when one is
/// configured or declared in `pyproject.toml`.
pub async fn check(config: &Config, policy: ConsistencyPolicy) -> Result<ValidationOutcome> {
    let discovery = discover(config).await?;
    let expected = match policy {
        ConsistencyPolicy::Independent => project_version(config).await?,
        ConsistencyPolicy::Matching => None,
    };
    Ok(validate_against(&discovery, policy, expected.as_deref()))
}

#[cfg(test)]
pub mod fixtures;
