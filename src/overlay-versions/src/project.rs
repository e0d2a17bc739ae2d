//! Version of the project that owns the overlays.

use pipeline_core::{Config, Error, Result};

use serde::Deserialize;
use std::io::ErrorKind;
use tracing::debug;

pub static PYPROJECT_FILE: &str = "pyproject.toml";

#[derive(Deserialize, Debug, Default)]
struct PyProject {
    project: Option<Section>,
    tool: Option<Tools>,
}

#[derive(Deserialize, Debug, Default)]
struct Tools {
    poetry: Option<Section>,
}

#[derive(Deserialize, Debug, Default)]
struct Section {
    version: Option<String>,
}

/// `config.project_version` when set, otherwise the version declared in
/// `pyproject.toml` under the project root (`[tool.poetry]` first, then
/// `[project]`). `None` when neither exists.
pub async fn project_version(config: &Config) -> Result<Option<String>> {
    if let Some(version) = &config.project_version {
        return Ok(Some(version.clone()));
    }

    let path = config.root.join(PYPROJECT_FILE);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("No {} under {}", PYPROJECT_FILE, config.root.display());
            return Ok(None);
        }
        Err(err) => return Err(Error::io(path, err)),
    };

    let manifest: PyProject = toml::from_str(&text)
        .map_err(|err| Error::DeserializationError(format!("{}: {err}", path.display())))?;
    let version = manifest
        .tool
        .and_then(|tool| tool.poetry)
        .and_then(|poetry| poetry.version)
        .or_else(|| manifest.project.and_then(|project| project.version));
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::OverlayTree;

    #[tokio::test]
    async fn prefers_configured_version() {
        let tree = OverlayTree::new();
        std::fs::write(tree.root().join(PYPROJECT_FILE), "[project]\nversion = \"1.0.0\"\n").unwrap();
        let config = tree.config().with_project_version("2.0.0").unwrap();

        assert_eq!(project_version(&config).await.unwrap().as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn reads_poetry_then_project_table() {
        let tree = OverlayTree::new();
        let path = tree.root().join(PYPROJECT_FILE);

        std::fs::write(&path, "[project]\nname = \"css\"\nversion = \"1.3.0\"\n").unwrap();
        assert_eq!(project_version(&tree.config()).await.unwrap().as_deref(), Some("1.3.0"));

        std::fs::write(
            &path,
            "[project]\nname = \"css\"\ndynamic = [\"version\"]\n\n[tool.poetry]\nversion = \"1.4.0\"\n",
        )
        .unwrap();
        assert_eq!(project_version(&tree.config()).await.unwrap().as_deref(), Some("1.4.0"));
    }

    #[tokio::test]
    async fn missing_manifest_means_unknown() {
        let tree = OverlayTree::new();

        assert_eq!(project_version(&tree.config()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_broken_manifest() {
        let tree = OverlayTree::new();
        std::fs::write(tree.root().join(PYPROJECT_FILE), "[project\n").unwrap();

        let err = project_version(&tree.config()).await.unwrap_err();

        assert_eq!(err.kind_label(), "deserialization_error");
    }
}
