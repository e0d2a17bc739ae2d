//! Plain-text rendering of engine results for terminals.

use crate::model::{UpdateOutcome, UpdateStatus, ValidationOutcome};

use itertools::Itertools;

const HEADERS: [&str; 5] = ["OVERLAY", "INSTANCE", "IMAGE TAG", "VERSION LABEL", "STATUS"];

pub fn render_validation(outcome: &ValidationOutcome) -> String {
    let mut rows = outcome
        .reports
        .iter()
        .map(|report| {
            [
                report.overlay_name.clone(),
                report.instance_label.clone().unwrap_or_else(|| "-".into()),
                report.image_tag.clone().unwrap_or_else(|| "-".into()),
                report.version_label.clone().unwrap_or_else(|| "-".into()),
                if report.consistent {
                    "ok".to_string()
                } else {
                    report.issues.iter().join("; ")
                },
            ]
        })
        .collect::<Vec<_>>();
    rows.extend(outcome.malformed.iter().map(|malformed| {
        [
            malformed.name.clone(),
            "-".into(),
            "-".into(),
            "-".into(),
            format!("malformed: {}", malformed.reason),
        ]
    }));
    rows.sort_by(|a, b| a[0].cmp(&b[0]));

    let mut out = table(&rows);
    for warning in &outcome.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }

    let total = rows.len();
    let bad = outcome.inconsistent().count() + outcome.malformed.len();
    let policy = match &outcome.project_version {
        Some(version) => format!("{} policy, project version {version}", outcome.policy),
        None => format!("{} policy", outcome.policy),
    };
    if outcome.overall_consistent {
        out.push_str(&format!("All {total} overlay(s) are consistent ({policy})\n"));
    } else {
        out.push_str(&format!("{bad} of {total} overlay(s) are inconsistent ({policy})\n"));
    }
    out
}

pub fn render_update(outcome: &UpdateOutcome) -> String {
    let mut out = String::new();
    for record in &outcome.records {
        out.push_str(&format!("{}: {}\n", record.overlay_name, status_text(&record.status)));
        for change in &record.changes {
            out.push_str(&format!(
                "  {}: {} -> {}\n",
                change.field,
                change.before.as_deref().unwrap_or("(none)"),
                change.after
            ));
        }
        if outcome.dry_run && !record.edits.is_empty() {
            out.push_str(&record.diff());
        }
    }

    let failed = outcome.failed().count();
    let verb = if outcome.dry_run { "Planned" } else { "Updated" };
    if failed == 0 {
        out.push_str(&format!(
            "{verb} {} overlay(s) to {}\n",
            outcome.records.len(),
            outcome.target_version
        ));
    } else {
        out.push_str(&format!(
            "{failed} of {} overlay(s) failed to move to {}\n",
            outcome.records.len(),
            outcome.target_version
        ));
    }
    out
}

fn status_text(status: &UpdateStatus) -> String {
    match status {
        UpdateStatus::Unchanged => "unchanged".into(),
        UpdateStatus::Pending => "would update".into(),
        UpdateStatus::Written => "updated".into(),
        UpdateStatus::RolledBack => "rolled back".into(),
        UpdateStatus::Skipped { reason } => format!("skipped: {reason}"),
        UpdateStatus::Failed { message, .. } => format!("failed: {message}"),
    }
}

fn table(rows: &[[String; 5]]) -> String {
    let mut widths = HEADERS.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| {
        let padded = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .join("  ");
        format!("{}\n", padded.trim_end())
    };

    let mut out = line(HEADERS.to_vec());
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeRecord, ConsistencyPolicy, Issue, MalformedOverlay, VersionReport};
    use chrono::Utc;
    use std::path::PathBuf;

    fn report(name: &str, tag: &str, label: &str) -> VersionReport {
        let consistent = tag == label;
        VersionReport {
            overlay_name: name.into(),
            instance_label: Some(format!("css-{name}")),
            image_tag: Some(tag.into()),
            version_label: Some(label.into()),
            consistent,
            issues: if consistent {
                Vec::new()
            } else {
                vec![Issue::Mismatch {
                    image_tag: tag.into(),
                    version_label: label.into(),
                }]
            },
        }
    }

    #[test]
    fn renders_validation_table() {
        let outcome = ValidationOutcome {
            overall_consistent: false,
            policy: ConsistencyPolicy::Matching,
            project_version: None,
            reports: vec![report("a", "6.0.2", "6.0.2"), report("b", "6.0.2", "6.0.1")],
            malformed: vec![MalformedOverlay {
                name: "c".into(),
                path: PathBuf::from("overlays/c"),
                reason: "no kustomization.yaml found".into(),
            }],
            warnings: Vec::new(),
            generated_at: Utc::now(),
        };

        let text = render_validation(&outcome);
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "OVERLAY  INSTANCE  IMAGE TAG  VERSION LABEL  STATUS");
        assert_eq!(lines[1], "a        css-a     6.0.2      6.0.2          ok");
        assert!(lines[2].ends_with("image tag '6.0.2' != version label '6.0.1'"));
        assert!(lines[3].starts_with("c  ") && lines[3].ends_with("malformed: no kustomization.yaml found"));
        assert_eq!(lines[4], "2 of 3 overlay(s) are inconsistent (matching policy)");
    }

    #[test]
    fn renders_update_summary() {
        let outcome = UpdateOutcome {
            target_version: "6.0.3".into(),
            dry_run: false,
            records: vec![
                ChangeRecord {
                    overlay_name: "a".into(),
                    path: PathBuf::from("overlays/a/kustomization.yaml"),
                    changes: Vec::new(),
                    edits: Vec::new(),
                    status: UpdateStatus::Unchanged,
                },
                ChangeRecord {
                    overlay_name: "b".into(),
                    path: PathBuf::from("overlays/b/kustomization.yaml"),
                    changes: Vec::new(),
                    edits: Vec::new(),
                    status: UpdateStatus::Skipped {
                        reason: "batch timeout reached".into(),
                    },
                },
            ],
            generated_at: Utc::now(),
        };

        assert_eq!(
            render_update(&outcome),
            "a: unchanged\nb: skipped: batch timeout reached\n1 of 2 overlay(s) failed to move to 6.0.3\n"
        );
    }
}
