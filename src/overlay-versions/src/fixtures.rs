//! Helper methods only available for tests
use pipeline_core::Config;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Kustomization in the shape used by the project's overlays.
pub fn kustomization(instance: &str, image_tag: &str, version_label: &str) -> String {
    format!(
        r#"apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization

resources:
  - ../../base

# instance identity
labels:
  - includeSelectors: true
    pairs:
      app.kubernetes.io/instance: {instance}
  - pairs:
      app.kubernetes.io/version: "{version_label}"

images:
  - name: docker.io/solidproject/community-server
    newTag: {image_tag} # application version
"#
    )
}

/// A throwaway project root with an `overlays/` directory.
pub struct OverlayTree {
    dir: TempDir,
}

impl OverlayTree {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("overlays")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> Config {
        Config::new(self.root())
    }

    pub fn overlay(self, name: &str, contents: &str) -> Self {
        self.file(name, "kustomization.yaml", contents)
    }

    pub fn with(self, name: &str, image_tag: &str, version_label: &str) -> Self {
        let contents = kustomization(&format!("css-{name}"), image_tag, version_label);
        self.overlay(name, &contents)
    }

    pub fn file(self, overlay: &str, file: &str, contents: &str) -> Self {
        let dir = self.root().join("overlays").join(overlay);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), contents).unwrap();
        self
    }

    pub fn path(&self, overlay: &str) -> PathBuf {
        self.root().join("overlays").join(overlay).join("kustomization.yaml")
    }

    pub fn read(&self, overlay: &str) -> String {
        fs::read_to_string(self.path(overlay)).unwrap()
    }

    /// Every file under `overlays/` with its bytes.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(self.root().join("overlays"))
            .into_iter()
            .map(Result::unwrap)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| (entry.path().to_path_buf(), fs::read(entry.path()).unwrap()))
            .collect()
    }
}
