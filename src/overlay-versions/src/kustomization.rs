use crate::model::{LabelLocation, LabelSite, Overlay};
use pipeline_core::Config;

use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub(crate) static DEPLOYMENT_KIND: &str = "Deployment";
pub(crate) static PATCH_OPS: [&str; 2] = ["add", "replace"];
/// Label maps a Deployment patch may set, as key paths.
pub(crate) static LABEL_PATHS: [&[&str]; 2] = [
    &["spec", "template", "metadata", "labels"],
    &["metadata", "labels"],
];

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Kustomization {
    #[serde(default, deserialize_with = "null_default::deserialize")]
    pub images: Vec<ImageOverride>,
    #[serde(default, deserialize_with = "null_default::deserialize")]
    pub labels: Vec<LabelSet>,
    #[serde(default, deserialize_with = "null_default::deserialize")]
    pub common_labels: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "null_default::deserialize")]
    pub patches: Vec<PatchEntry>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageOverride {
    pub name: String,
    pub new_tag: Option<Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LabelSet {
    #[serde(default, deserialize_with = "null_default::deserialize")]
    pub pairs: BTreeMap<String, Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PatchEntry {
    pub patch: Option<String>,
    pub target: Option<PatchTarget>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PatchTarget {
    pub kind: Option<String>,
}

/// JSON pointer to `key` inside each of the `LABEL_PATHS` maps.
pub(crate) fn label_pointers(key: &str) -> Vec<String> {
    let escaped = key.replace('~', "~0").replace('/', "~1");
    LABEL_PATHS
        .iter()
        .map(|path| format!("/{}/{}", path.join("/"), escaped))
        .collect()
}

/// Scalars are compared as text: `newTag: 6` and `newTag: "6"` are the same tag.
pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Kustomization {
    pub fn image_tag(&self, image: &str) -> Option<String> {
        self.images
            .iter()
            .find(|entry| entry.name == image)
            .and_then(|entry| entry.new_tag.as_ref())
            .and_then(scalar_string)
    }

    /// Plain label value from `labels[].pairs` or `commonLabels`.
    pub fn label(&self, key: &str) -> Option<String> {
        self.labels
            .iter()
            .find_map(|set| set.pairs.get(key))
            .or_else(|| self.common_labels.get(key))
            .and_then(scalar_string)
    }

    pub fn label_sites(&self, key: &str) -> Vec<LabelSite> {
        let mut sites = Vec::new();

        for (index, set) in self.labels.iter().enumerate() {
            if let Some(value) = set.pairs.get(key).and_then(scalar_string) {
                sites.push(LabelSite {
                    location: LabelLocation::Labels { index },
                    value,
                });
            }
        }

        if let Some(value) = self.common_labels.get(key).and_then(scalar_string) {
            sites.push(LabelSite {
                location: LabelLocation::CommonLabels,
                value,
            });
        }

        for (index, entry) in self.patches.iter().enumerate() {
            sites.extend(patch_sites(index, entry, key));
        }

        sites
    }
}

fn patch_sites(index: usize, entry: &PatchEntry, key: &str) -> Vec<LabelSite> {
    let Some(patch) = &entry.patch else {
        return Vec::new();
    };
    let target_kind = entry.target.as_ref().and_then(|t| t.kind.as_deref());

    let body: Value = match serde_yaml::from_str(patch) {
        Ok(body) => body,
        Err(err) => {
            debug!("Ignoring unparsable patch {}: {}", index, err);
            return Vec::new();
        }
    };

    match &body {
        Value::Sequence(ops) if target_kind == Some(DEPLOYMENT_KIND) => {
            let pointers = label_pointers(key);
            ops.iter()
                .enumerate()
                .filter_map(|(op_index, op)| {
                    let op_name = op.get("op").and_then(Value::as_str)?;
                    let path = op.get("path").and_then(Value::as_str)?;
                    if !PATCH_OPS.contains(&op_name) || !pointers.iter().any(|p| p == path) {
                        return None;
                    }
                    Some(LabelSite {
                        location: LabelLocation::JsonPatch {
                            patch: index,
                            op: op_index,
                        },
                        value: op.get("value").and_then(scalar_string)?,
                    })
                })
                .collect()
        }
        Value::Mapping(_) => {
            let kind = target_kind.or_else(|| body.get("kind").and_then(Value::as_str));
            if kind != Some(DEPLOYMENT_KIND) {
                return Vec::new();
            }
            LABEL_PATHS
                .iter()
                .filter_map(|path| {
                    let labels = path.iter().try_fold(&body, |node, segment| node.get(*segment))?;
                    Some(LabelSite {
                        location: LabelLocation::MergePatch {
                            patch: index,
                            path: path.join("."),
                        },
                        value: labels.get(key).and_then(scalar_string)?,
                    })
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

impl Overlay {
    /// Extracts the version fields from a kustomization document.
    /// The error is a human readable reason.
    pub fn parse(name: &str, path: &Path, source: String, config: &Config) -> Result<Overlay, String> {
        let doc: Kustomization = serde_yaml::from_str(&source).map_err(|err| err.to_string())?;
        let version_label_sites = doc.label_sites(&config.version_label);

        Ok(Overlay {
            name: name.to_string(),
            path: path.to_path_buf(),
            instance_label: doc.label(&config.instance_label),
            image_tag: doc.image_tag(&config.image),
            version_label: version_label_sites.first().map(|site| site.value.clone()),
            version_label_sites,
            source,
        })
    }
}

mod null_default {
    use serde::{Deserialize, Deserializer};

    /// Treats an explicit `null` (e.g. `images:` with no entries) as empty.
    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(source: &str) -> Result<Overlay, String> {
        let config = Config::new("/project");
        Overlay::parse(
            "with-pvc",
            &PathBuf::from("/project/overlays/with-pvc/kustomization.yaml"),
            source.to_string(),
            &config,
        )
    }

    #[test]
    fn extracts_labels_and_image() {
        let overlay = parse(
            r#"
labels:
  - includeSelectors: true
    pairs:
      app.kubernetes.io/instance: css-with-pvc
  - pairs:
      app.kubernetes.io/version: "6.0.2"
images:
  - name: docker.io/solidproject/community-server
    newTag: 6.0.2
  - name: docker.io/library/busybox
    newTag: "1.36"
"#,
        )
        .unwrap();
        assert_eq!(overlay.instance_label.as_deref(), Some("css-with-pvc"));
        assert_eq!(overlay.image_tag.as_deref(), Some("6.0.2"));
        assert_eq!(overlay.version_label.as_deref(), Some("6.0.2"));
        assert_eq!(
            overlay.version_label_sites,
            vec![LabelSite {
                location: LabelLocation::Labels { index: 1 },
                value: "6.0.2".into()
            }]
        );
    }

    #[test]
    fn finds_labels_in_patches() {
        let overlay = parse(
            r#"
commonLabels:
  app.kubernetes.io/version: 6.0.2
patches:
  - target:
      kind: Deployment
      name: css
    patch: |-
      - op: add
        path: /spec/template/metadata/labels/app.kubernetes.io~1version
        value: "6.0.1"
      - op: replace
        path: /spec/replicas
        value: 2
  - patch: |-
      apiVersion: apps/v1
      kind: Deployment
      metadata:
        name: css
      spec:
        template:
          metadata:
            labels:
              app.kubernetes.io/version: 6.0.0
  - target:
      kind: Service
    patch: |-
      - op: add
        path: /metadata/labels/app.kubernetes.io~1version
        value: "9.9.9"
"#,
        )
        .unwrap();
        let locations = overlay
            .version_label_sites
            .iter()
            .map(|site| (site.location.to_string(), site.value.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            locations,
            vec![
                ("commonLabels".to_string(), "6.0.2"),
                ("patches[0] op 0".to_string(), "6.0.1"),
                ("patches[1] spec.template.metadata.labels".to_string(), "6.0.0"),
            ]
        );
        assert_eq!(overlay.image_tag, None);
    }

    #[test]
    fn tolerates_empty_sections() {
        let overlay = parse("resources:\n  - ../../base\nimages:\nlabels:\n").unwrap();
        assert_eq!(overlay.image_tag, None);
        assert!(overlay.version_label_sites.is_empty());
    }

    #[test]
    fn rejects_non_mapping_documents() {
        assert!(parse("- just\n- a list\n").is_err());
        assert!(parse("images: [unterminated\n").is_err());
        assert!(parse("images:\n  - newTag: 6.0.2\n").is_err());
    }

    #[test]
    fn builds_label_pointers() {
        assert_eq!(
            label_pointers("app.kubernetes.io/version"),
            vec![
                "/spec/template/metadata/labels/app.kubernetes.io~1version",
                "/metadata/labels/app.kubernetes.io~1version",
            ]
        );
    }
}
