use crate::model::{
    is_valid_version, ConsistencyPolicy, Discovery, Issue, Overlay, ValidationOutcome, ValidationWarning,
    VersionReport,
};

use chrono::Utc;
use itertools::Itertools;
use tracing::{info, warn};

/// Checks every discovered overlay. Never fails: problems end up in the
/// per-overlay reports, in `malformed`, or in `warnings`.
pub fn validate(discovery: &Discovery, policy: ConsistencyPolicy) -> ValidationOutcome {
    validate_against(discovery, policy, None)
}

/// Like [`validate`], additionally holding version labels to
/// `project_version` under the independent policy.
pub fn validate_against(
    discovery: &Discovery,
    policy: ConsistencyPolicy,
    project_version: Option<&str>,
) -> ValidationOutcome {
    let project_version = project_version.filter(|_| policy == ConsistencyPolicy::Independent);
    let reports = discovery
        .overlays()
        .map(|overlay| check_overlay(overlay, policy, project_version))
        .collect::<Vec<_>>();
    let malformed = discovery.malformed().cloned().collect::<Vec<_>>();
    let warnings = duplicate_instances(discovery);

    for report in reports.iter().filter(|report| !report.consistent) {
        let issues = report.issues.iter().map(ToString::to_string).join("; ");
        warn!("Overlay {} is inconsistent: {}", report.overlay_name, issues);
    }
    for warning in &warnings {
        warn!("{}", warning);
    }

    let overall_consistent = malformed.is_empty() && reports.iter().all(|report| report.consistent);
    info!(
        "Validated {} overlay(s) with {} policy: {}",
        reports.len() + malformed.len(),
        policy,
        if overall_consistent { "consistent" } else { "inconsistent" }
    );

    ValidationOutcome {
        overall_consistent,
        policy,
        project_version: project_version.map(str::to_string),
        reports,
        malformed,
        warnings,
        generated_at: Utc::now(),
    }
}

pub fn check_overlay(overlay: &Overlay, policy: ConsistencyPolicy, project_version: Option<&str>) -> VersionReport {
    let mut issues = Vec::new();

    match &overlay.image_tag {
        None => issues.push(Issue::MissingImageTag),
        Some(tag) if !is_valid_version(tag) => issues.push(Issue::InvalidImageTag { value: tag.clone() }),
        Some(_) => {}
    }
    match &overlay.version_label {
        None => issues.push(Issue::MissingVersionLabel),
        Some(label) if !is_valid_version(label) => {
            issues.push(Issue::InvalidVersionLabel { value: label.clone() })
        }
        Some(_) => {}
    }

    if overlay.version_label_sites.iter().map(|site| &site.value).unique().count() > 1 {
        issues.push(Issue::LabelSitesDisagree {
            sites: overlay.version_label_sites.clone(),
        });
    }

    match policy {
        ConsistencyPolicy::Matching => {
            if let (Some(tag), Some(label)) = (&overlay.image_tag, &overlay.version_label) {
                if tag != label {
                    issues.push(Issue::Mismatch {
                        image_tag: tag.clone(),
                        version_label: label.clone(),
                    });
                }
            }
        }
        ConsistencyPolicy::Independent => {
            if let (Some(expected), Some(label)) = (project_version, &overlay.version_label) {
                if label != expected && is_valid_version(label) {
                    issues.push(Issue::LabelNotProjectVersion {
                        version_label: label.clone(),
                        project_version: expected.to_string(),
                    });
                }
            }
        }
    }

    VersionReport {
        overlay_name: overlay.name.clone(),
        instance_label: overlay.instance_label.clone(),
        image_tag: overlay.image_tag.clone(),
        version_label: overlay.version_label.clone(),
        consistent: issues.is_empty(),
        issues,
    }
}

fn duplicate_instances(discovery: &Discovery) -> Vec<ValidationWarning> {
    discovery
        .overlays()
        .filter_map(|overlay| Some((overlay.instance_label.clone()?, overlay.name.clone())))
        .into_group_map()
        .into_iter()
        .filter(|(_, overlays)| overlays.len() > 1)
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .map(|(label, overlays)| ValidationWarning::DuplicateInstanceLabel { label, overlays })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discover;
    use crate::fixtures::{kustomization, OverlayTree};
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[tokio::test]
    async fn flags_mismatched_overlay_only() {
        let tree = OverlayTree::new().with("a", "6.0.2", "6.0.2").with("b", "6.0.2", "6.0.1");
        let discovery = discover(&tree.config()).await.unwrap();

        let outcome = validate(&discovery, ConsistencyPolicy::Matching);

        assert!(!outcome.overall_consistent);
        assert!(outcome.report("a").unwrap().consistent);
        let b = outcome.report("b").unwrap();
        assert!(!b.consistent);
        assert_eq!(
            b.issues,
            vec![Issue::Mismatch {
                image_tag: "6.0.2".into(),
                version_label: "6.0.1".into()
            }]
        );
    }

    #[tokio::test]
    async fn independent_policy_allows_different_values() {
        let tree = OverlayTree::new().with("a", "6.0.2", "6.0.2").with("b", "6.0.2", "6.0.1");
        let discovery = discover(&tree.config()).await.unwrap();

        let outcome = validate(&discovery, ConsistencyPolicy::Independent);

        assert!(outcome.overall_consistent);
        assert_eq!(outcome.inconsistent().count(), 0);
    }

    #[tokio::test]
    async fn independent_policy_holds_labels_to_project_version() {
        let tree = OverlayTree::new().with("a", "6.0.2", "1.4.0").with("b", "6.0.2", "1.3.0");
        let discovery = discover(&tree.config()).await.unwrap();

        let outcome = validate_against(&discovery, ConsistencyPolicy::Independent, Some("1.4.0"));

        assert!(!outcome.overall_consistent);
        assert_eq!(outcome.project_version.as_deref(), Some("1.4.0"));
        assert!(outcome.report("a").unwrap().consistent);
        assert_eq!(
            outcome.report("b").unwrap().issues,
            vec![Issue::LabelNotProjectVersion {
                version_label: "1.3.0".into(),
                project_version: "1.4.0".into(),
            }]
        );
    }

    #[tokio::test]
    async fn matching_policy_ignores_project_version() {
        let tree = OverlayTree::new().with("a", "6.0.2", "6.0.2");
        let discovery = discover(&tree.config()).await.unwrap();

        let outcome = validate_against(&discovery, ConsistencyPolicy::Matching, Some("1.4.0"));

        assert!(outcome.overall_consistent);
        assert_eq!(outcome.project_version, None);
    }

    #[tokio::test]
    async fn reports_missing_and_invalid_fields() {
        let tree = OverlayTree::new()
            .overlay("bare", "resources:\n  - ../../base\n")
            .with("latest", "latest", "6.0.2");
        let discovery = discover(&tree.config()).await.unwrap();

        let outcome = validate(&discovery, ConsistencyPolicy::Independent);

        assert_eq!(
            outcome.report("bare").unwrap().issues,
            vec![Issue::MissingImageTag, Issue::MissingVersionLabel]
        );
        assert_eq!(
            outcome.report("latest").unwrap().issues,
            vec![Issue::InvalidImageTag { value: "latest".into() }]
        );
    }

    #[tokio::test]
    async fn malformed_overlay_breaks_overall_consistency() {
        let tree = OverlayTree::new()
            .with("a", "6.0.2", "6.0.2")
            .overlay("broken", "- not\n- a mapping\n");
        let discovery = discover(&tree.config()).await.unwrap();

        let outcome = validate(&discovery, ConsistencyPolicy::Matching);

        assert!(outcome.report("a").unwrap().consistent);
        assert_eq!(outcome.malformed.len(), 1);
        assert!(!outcome.overall_consistent);
    }

    #[tokio::test]
    async fn detects_disagreeing_label_sites() {
        let source = format!(
            "{}commonLabels:\n  app.kubernetes.io/version: 6.0.1\n",
            kustomization("css-a", "6.0.2", "6.0.2")
        );
        let tree = OverlayTree::new().overlay("a", &source);
        let discovery = discover(&tree.config()).await.unwrap();

        let report = check_overlay(discovery.overlays().next().unwrap(), ConsistencyPolicy::Matching, None);

        assert!(!report.consistent);
        assert!(matches!(&report.issues[..], [Issue::LabelSitesDisagree { sites }] if sites.len() == 2));
    }

    #[tokio::test]
    async fn warns_about_shared_instance_labels() {
        let tree = OverlayTree::new()
            .overlay("a", &kustomization("css", "6.0.2", "6.0.2"))
            .overlay("b", &kustomization("css", "6.0.2", "6.0.2"))
            .with("c", "6.0.2", "6.0.2");
        let discovery = discover(&tree.config()).await.unwrap();

        let outcome = validate(&discovery, ConsistencyPolicy::Matching);

        assert!(outcome.overall_consistent);
        assert_eq!(
            outcome.warnings,
            vec![ValidationWarning::DuplicateInstanceLabel {
                label: "css".into(),
                overlays: vec!["a".into(), "b".into()],
            }]
        );
    }

    #[tokio::test]
    async fn serializes_outcome_shape() {
        let tree = OverlayTree::new().with("b", "6.0.2", "6.0.1");
        let discovery = discover(&tree.config()).await.unwrap();

        let outcome = validate(&discovery, ConsistencyPolicy::Matching);

        assert_json_include!(
            actual: serde_json::to_value(&outcome).unwrap(),
            expected: json!({
                "overallConsistent": false,
                "policy": "matching",
                "reports": [{
                    "overlayName": "b",
                    "instanceLabel": "css-b",
                    "imageTag": "6.0.2",
                    "versionLabel": "6.0.1",
                    "consistent": false,
                    "issues": [{"kind": "mismatch", "imageTag": "6.0.2", "versionLabel": "6.0.1"}]
                }],
                "malformed": [],
                "warnings": []
            })
        );
    }
}
