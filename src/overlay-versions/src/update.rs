use crate::discover;
use crate::edit::{Document, ScalarStyle};
use crate::kustomization::{label_pointers, DEPLOYMENT_KIND};
use crate::model::{
    ensure_valid_version, ChangeRecord, ChangedField, DiscoveredOverlay, Discovery, FieldChange, LabelLocation,
    LabelSite, LineEdit, Overlay, UpdateOutcome, UpdateScope, UpdateStatus, VersionUpdateRequest,
};

use pipeline_core::{fs::atomic_write, Config, Error, Result};

use chrono::Utc;
use futures::{stream, StreamExt};
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Discovers the overlays under `config.root` and moves the selected ones to
/// `request.target_version`.
pub async fn update(config: &Config, request: &VersionUpdateRequest) -> Result<UpdateOutcome> {
    ensure_valid_version(&request.target_version)?;
    let discovery = discover(config).await?;
    apply(config, &discovery, request).await
}

/// Applies `request` to an existing discovery.
///
/// Operation-level problems (bad target, unknown or malformed named overlay,
/// an aborted all-or-nothing batch) are errors and write nothing. Everything
/// else is reported per overlay in the returned records.
pub async fn apply(config: &Config, discovery: &Discovery, request: &VersionUpdateRequest) -> Result<UpdateOutcome> {
    ensure_valid_version(&request.target_version)?;
    let target = request.target_version.as_str();
    let deadline = request.timeout.map(|timeout| Instant::now() + timeout);

    let selected = match &request.scope {
        UpdateScope::All => discovery.entries.iter().collect::<Vec<_>>(),
        UpdateScope::Overlay(name) => match discovery.get(name) {
            None => return Err(Error::OverlayNotFound(name.clone())),
            Some(DiscoveredOverlay::Malformed(malformed)) => return Err(malformed.into()),
            Some(found) => vec![found],
        },
    };

    let plans = selected
        .into_iter()
        .map(|entry| match entry {
            DiscoveredOverlay::Found(overlay) => plan_overlay(config, overlay, target)
                .map_err(|err| ChangeRecord::failed(&overlay.name, &overlay.path, &err)),
            DiscoveredOverlay::Malformed(malformed) => Err(ChangeRecord::failed(
                &malformed.name,
                &malformed.path,
                &Error::from(malformed),
            )),
        })
        .collect::<Vec<_>>();

    if request.all_or_nothing {
        let failed = plans
            .iter()
            .filter_map(|plan| plan.as_ref().err())
            .map(|record| record.overlay_name.clone())
            .collect::<Vec<_>>();
        if !failed.is_empty() {
            warn!("Aborting update to {}: {} overlay(s) cannot be updated", target, failed.len());
            return Err(Error::BatchAborted(failed));
        }
    }

    let mut committed = stream::iter(plans)
        .map(|plan| commit(plan, request.dry_run, deadline))
        .buffered(config.concurrency)
        .collect::<Vec<_>>()
        .await;

    if request.all_or_nothing && committed.iter().any(|(record, _)| record.status.is_failure()) {
        rollback(&mut committed).await;
    }

    Ok(UpdateOutcome {
        target_version: target.to_string(),
        dry_run: request.dry_run,
        records: committed.into_iter().map(|(record, _)| record).collect(),
        generated_at: Utc::now(),
    })
}

/// New content for one overlay, computed in memory.
struct Plan {
    overlay_name: String,
    path: PathBuf,
    original: String,
    content: String,
    changes: Vec<FieldChange>,
    edits: Vec<LineEdit>,
}

impl Plan {
    fn into_record(self, status: UpdateStatus) -> ChangeRecord {
        ChangeRecord {
            overlay_name: self.overlay_name,
            path: self.path,
            changes: self.changes,
            edits: self.edits,
            status,
        }
    }
}

fn plan_overlay(config: &Config, overlay: &Overlay, target: &str) -> Result<Plan> {
    let uneditable = |field: String| Error::UneditableField {
        overlay: overlay.name.clone(),
        field,
    };
    let mut doc = Document::parse(&overlay.source);
    let mut changes = Vec::new();

    if overlay.image_tag.as_deref() != Some(target) {
        set_image_tag(&mut doc, &config.image, target)
            .ok_or_else(|| uneditable(format!("images[name={}].newTag", config.image)))?;
        changes.push(FieldChange {
            field: ChangedField::ImageTag,
            before: overlay.image_tag.clone(),
            after: target.to_string(),
        });
    }

    if overlay.version_label_sites.is_empty() {
        let location = insert_version_label(&mut doc, &config.version_label, target)
            .ok_or_else(|| uneditable(format!("labels[].pairs.{}", config.version_label)))?;
        changes.push(FieldChange {
            field: ChangedField::VersionLabel { location },
            before: None,
            after: target.to_string(),
        });
    }

    for site in overlay.version_label_sites.iter().filter(|site| site.value != target) {
        site_line(&doc, site, &config.version_label)
            .and_then(|line| doc.replace_scalar(line, target))
            .ok_or_else(|| uneditable(site.location.to_string()))?;
        changes.push(FieldChange {
            field: ChangedField::VersionLabel {
                location: site.location.clone(),
            },
            before: Some(site.value.clone()),
            after: target.to_string(),
        });
    }

    let (content, edits) = if doc.has_edits() {
        doc.render()
    } else {
        (overlay.source.clone(), Vec::new())
    };

    if !changes.is_empty() {
        verify(config, overlay, &content, target)?;
    }

    Ok(Plan {
        overlay_name: overlay.name.clone(),
        path: overlay.path.clone(),
        original: overlay.source.clone(),
        content,
        changes,
        edits,
    })
}

/// The edited text must read back with both fields on the target.
fn verify(config: &Config, overlay: &Overlay, content: &str, target: &str) -> Result<()> {
    let uneditable = |field: String| Error::UneditableField {
        overlay: overlay.name.clone(),
        field,
    };
    let edited = Overlay::parse(&overlay.name, &overlay.path, content.to_string(), config)
        .map_err(|reason| uneditable(format!("edited document does not parse: {reason}")))?;

    if edited.image_tag.as_deref() != Some(target) {
        return Err(uneditable(format!("images[name={}].newTag", config.image)));
    }
    if edited.version_label_sites.is_empty() {
        return Err(uneditable(config.version_label.clone()));
    }
    if let Some(site) = edited.version_label_sites.iter().find(|site| site.value != target) {
        return Err(uneditable(site.location.to_string()));
    }
    Ok(())
}

fn set_image_tag(doc: &mut Document, image: &str, target: &str) -> Option<()> {
    let Some(images) = doc.find_key(doc.root(), "images") else {
        let end = doc.len();
        doc.insert(
            end,
            vec![
                "images:".to_string(),
                format!("  - name: {image}"),
                format!("    newTag: {target}"),
            ],
        );
        return Some(());
    };
    if doc.entry(images)?.value.is_some() {
        return None;
    }

    let body = doc.children(images);
    let items = doc.items(body.clone());
    let item = items
        .iter()
        .find(|item| {
            doc.find_key((*item).clone(), "name")
                .and_then(|line| doc.scalar(line))
                .map_or(false, |name| name == image)
        })
        .cloned();

    match item {
        Some(item) => match doc.find_key(item.clone(), "newTag") {
            Some(tag) => doc.replace_scalar(tag, target),
            None => {
                let name = doc.find_key(item, "name")?;
                let pad = " ".repeat(doc.key_col(name)?);
                doc.insert(name + 1, vec![format!("{pad}newTag: {target}")]);
                Some(())
            }
        },
        None => {
            let dash = items.first().map_or(2, |first| doc.indent(first.start));
            let pad = " ".repeat(dash);
            let at = if items.is_empty() { images + 1 } else { body.end };
            doc.insert(
                at,
                vec![format!("{pad}- name: {image}"), format!("{pad}  newTag: {target}")],
            );
            Some(())
        }
    }
}

/// Adds the label where no site exists yet. A JSON6902 patch of the
/// Deployment gets an `add` op for the pod template label; otherwise the
/// label goes to the first `labels[]` entry that does not feed selectors, a
/// new `labels[]` entry, or a new section.
fn insert_version_label(doc: &mut Document, key: &str, target: &str) -> Option<LabelLocation> {
    if let Some(location) = insert_patch_op(doc, key, target) {
        return Some(location);
    }

    let Some(labels) = doc.find_key(doc.root(), "labels") else {
        let end = doc.len();
        doc.insert(
            end,
            vec![
                "labels:".to_string(),
                "  - pairs:".to_string(),
                format!("      {key}: {target}"),
            ],
        );
        return Some(LabelLocation::Labels { index: 0 });
    };
    if doc.entry(labels)?.value.is_some() {
        return None;
    }

    let body = doc.children(labels);
    let items = doc.items(body.clone());
    for (index, item) in items.iter().enumerate() {
        let selects = doc
            .find_key(item.clone(), "includeSelectors")
            .and_then(|line| doc.scalar(line))
            .map_or(false, |value| value == "true");
        let Some(pairs) = doc.find_key(item.clone(), "pairs") else {
            continue;
        };
        if selects || doc.entry(pairs)?.value.is_some() {
            continue;
        }

        let pairs_body = doc.children(pairs);
        let (at, col) = match doc.mapping_col(pairs_body.clone()) {
            Some(col) if !pairs_body.is_empty() => (pairs_body.end, col),
            _ => (pairs + 1, doc.key_col(pairs)? + 2),
        };
        doc.insert(at, vec![format!("{}{key}: {target}", " ".repeat(col))]);
        return Some(LabelLocation::Labels { index });
    }

    let dash = items.first().map_or(2, |first| doc.indent(first.start));
    let pad = " ".repeat(dash);
    let at = if items.is_empty() { labels + 1 } else { body.end };
    doc.insert(
        at,
        vec![format!("{pad}- pairs:"), format!("{pad}    {key}: {target}")],
    );
    Some(LabelLocation::Labels { index: items.len() })
}

/// Appends an op to the first block-style JSON6902 patch targeting the Deployment.
fn insert_patch_op(doc: &mut Document, key: &str, target: &str) -> Option<LabelLocation> {
    let patches = doc.find_key(doc.root(), "patches")?;
    if doc.entry(patches)?.value.is_some() {
        return None;
    }

    let items = doc.items(doc.children(patches));
    for (index, item) in items.iter().enumerate() {
        let deployment = doc
            .lookup(item.clone(), &["target", "kind"])
            .and_then(|line| doc.scalar(line))
            .map_or(false, |kind| kind == DEPLOYMENT_KIND);
        let Some(body) = doc.find_key(item.clone(), "patch") else {
            continue;
        };
        if !deployment || doc.style(body) != Some(ScalarStyle::Block) {
            continue;
        }

        let ops = doc.items(doc.children(body));
        let (Some(first), Some(last)) = (ops.first(), ops.last()) else {
            continue;
        };
        if doc.find_key(first.clone(), "op").is_none() {
            continue;
        }

        let dash = " ".repeat(doc.indent(first.start));
        let pad = " ".repeat(doc.key_col(first.start)?);
        let pointer = label_pointers(key).into_iter().next()?;
        doc.insert(
            last.end,
            vec![
                format!("{dash}- op: add"),
                format!("{pad}path: {pointer}"),
                format!("{pad}value: \"{target}\""),
            ],
        );
        return Some(LabelLocation::JsonPatch {
            patch: index,
            op: ops.len(),
        });
    }
    None
}

/// Line holding the scalar of a known label site.
fn site_line(doc: &Document, site: &LabelSite, key: &str) -> Option<usize> {
    match &site.location {
        LabelLocation::Labels { index } => {
            let labels = doc.find_key(doc.root(), "labels")?;
            let item = doc.items(doc.children(labels)).get(*index)?.clone();
            let pairs = doc.find_key(item, "pairs")?;
            doc.find_key(doc.children(pairs), key)
        }
        LabelLocation::CommonLabels => doc.lookup(doc.root(), &["commonLabels", key]),
        LabelLocation::JsonPatch { patch, op } => {
            let body = patch_body(doc, *patch)?;
            let op = doc.items(doc.children(body)).get(*op)?.clone();
            doc.find_key(op, "value")
        }
        LabelLocation::MergePatch { patch, path } => {
            let body = patch_body(doc, *patch)?;
            let mut keys = path.split('.').collect::<Vec<_>>();
            keys.push(key);
            doc.lookup(doc.children(body), &keys)
        }
    }
}

/// The `patch: |` line of `patches[index]`; other scalar styles are not editable.
fn patch_body(doc: &Document, index: usize) -> Option<usize> {
    let patches = doc.find_key(doc.root(), "patches")?;
    let item = doc.items(doc.children(patches)).get(index)?.clone();
    let body = doc.find_key(item, "patch")?;
    (doc.style(body) == Some(ScalarStyle::Block)).then_some(body)
}

async fn commit(
    plan: Result<Plan, ChangeRecord>,
    dry_run: bool,
    deadline: Option<Instant>,
) -> (ChangeRecord, Option<String>) {
    let plan = match plan {
        Ok(plan) => plan,
        Err(record) => {
            if let UpdateStatus::Failed { message, .. } = &record.status {
                warn!("Cannot update overlay {}: {}", record.overlay_name, message);
            }
            return (record, None);
        }
    };

    if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
        warn!("Skipping overlay {}: batch timeout reached", plan.overlay_name);
        let reason = "batch timeout reached before the overlay was started".to_string();
        return (plan.into_record(UpdateStatus::Skipped { reason }), None);
    }

    if plan.changes.is_empty() {
        info!("Overlay {} is already up to date", plan.overlay_name);
        return (plan.into_record(UpdateStatus::Unchanged), None);
    }
    if dry_run {
        info!("Overlay {}: {} change(s) pending", plan.overlay_name, plan.changes.len());
        return (plan.into_record(UpdateStatus::Pending), None);
    }

    match write(plan.path.clone(), plan.content.clone()).await {
        Ok(()) => {
            info!("Updated overlay {} ({})", plan.overlay_name, plan.path.display());
            let original = plan.original.clone();
            (plan.into_record(UpdateStatus::Written), Some(original))
        }
        Err(err) => {
            warn!("Failed to write overlay {}: {}", plan.overlay_name, err);
            (plan.into_record(UpdateStatus::failed(&err)), None)
        }
    }
}

async fn write(path: PathBuf, content: String) -> Result<()> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || atomic_write(&path, &content))
        .await
        .map_err(|err| Error::WriteFailure {
            path: target,
            source: std::io::Error::new(std::io::ErrorKind::Other, err),
        })?
}

/// Restores every overlay written in this batch.
async fn rollback(committed: &mut [(ChangeRecord, Option<String>)]) {
    for (record, original) in committed.iter_mut() {
        let Some(original) = original.take() else {
            continue;
        };
        match write(record.path.clone(), original).await {
            Ok(()) => {
                info!("Rolled back overlay {}", record.overlay_name);
                record.status = UpdateStatus::RolledBack;
            }
            Err(err) => {
                warn!("Rollback of overlay {} failed: {}", record.overlay_name, err);
                record.status = UpdateStatus::failed(&err);
            }
        }
    }
    debug!("Rollback finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{kustomization, OverlayTree};
    use crate::{check, ConsistencyPolicy};
    use std::time::Duration;

    async fn run(tree: &OverlayTree, request: VersionUpdateRequest) -> Result<UpdateOutcome> {
        update(&tree.config(), &request).await
    }

    #[tokio::test]
    async fn updates_both_fields_keeping_layout() {
        let tree = OverlayTree::new().with("a", "6.0.2", "6.0.2").with("b", "6.0.2", "6.0.1");

        let outcome = run(&tree, VersionUpdateRequest::new("6.0.3")).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.record("b").unwrap().status, UpdateStatus::Written);
        assert_eq!(tree.read("b"), kustomization("css-b", "6.0.3", "6.0.3"));

        let validation = check(&tree.config(), ConsistencyPolicy::Matching).await.unwrap();
        assert!(validation.overall_consistent);
        for report in &validation.reports {
            assert_eq!(report.image_tag.as_deref(), Some("6.0.3"));
            assert_eq!(report.version_label.as_deref(), Some("6.0.3"));
        }
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let tree = OverlayTree::new().with("a", "6.0.1", "6.0.1").with("b", "6.0.2", "6.0.1");

        run(&tree, VersionUpdateRequest::new("6.1.0")).await.unwrap();
        let before = tree.snapshot();
        let outcome = run(&tree, VersionUpdateRequest::new("6.1.0")).await.unwrap();

        assert!(outcome
            .records
            .iter()
            .all(|record| record.status == UpdateStatus::Unchanged && record.edits.is_empty()));
        assert_eq!(tree.snapshot(), before);
    }

    #[tokio::test]
    async fn rejects_invalid_version_without_writing() {
        let tree = OverlayTree::new().with("a", "6.0.2", "6.0.2");
        let before = tree.snapshot();

        let err = run(&tree, VersionUpdateRequest::new("not-a-version")).await.unwrap_err();

        assert_eq!(err.kind_label(), "invalid_version_format");
        assert_eq!(tree.snapshot(), before);
    }

    #[tokio::test]
    async fn dry_run_matches_real_run_and_writes_nothing() {
        let tree = OverlayTree::new().with("a", "6.0.2", "6.0.1").with("b", "5.0.0", "5.0.0");
        let before = tree.snapshot();

        let dry = run(&tree, VersionUpdateRequest::new("7.0.0-rc.1").dry_run(true)).await.unwrap();
        assert_eq!(tree.snapshot(), before);
        assert!(dry.dry_run);
        assert!(dry.records.iter().all(|record| record.status == UpdateStatus::Pending));

        let real = run(&tree, VersionUpdateRequest::new("7.0.0-rc.1")).await.unwrap();
        for (dry, real) in dry.records.iter().zip(&real.records) {
            assert_eq!(dry.changes, real.changes);
            assert_eq!(dry.edits, real.edits);
        }
    }

    #[tokio::test]
    async fn touches_only_the_selected_overlay() {
        let tree = OverlayTree::new().with("a", "6.0.1", "6.0.1").with("b", "6.0.1", "6.0.1");
        let other = std::fs::read(tree.path("b")).unwrap();

        let outcome = run(&tree, VersionUpdateRequest::new("6.0.2").for_overlay("a")).await.unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(std::fs::read(tree.path("b")).unwrap(), other);
        assert_eq!(tree.read("a"), kustomization("css-a", "6.0.2", "6.0.2"));
    }

    #[tokio::test]
    async fn rejects_unknown_and_malformed_scopes() {
        let tree = OverlayTree::new().with("a", "6.0.1", "6.0.1").overlay("bad", "- x\n");
        let before = tree.snapshot();

        let err = run(&tree, VersionUpdateRequest::new("6.0.2").for_overlay("missing")).await.unwrap_err();
        assert_eq!(err.kind_label(), "overlay_not_found");
        let err = run(&tree, VersionUpdateRequest::new("6.0.2").for_overlay("bad")).await.unwrap_err();
        assert_eq!(err.kind_label(), "malformed_overlay");
        assert_eq!(tree.snapshot(), before);
    }

    #[tokio::test]
    async fn continues_past_malformed_overlays() {
        let tree = OverlayTree::new().with("a", "6.0.1", "6.0.1").overlay("bad", "- x\n");

        let outcome = run(&tree, VersionUpdateRequest::new("6.0.2")).await.unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.record("a").unwrap().status, UpdateStatus::Written);
        assert!(matches!(
            &outcome.record("bad").unwrap().status,
            UpdateStatus::Failed { kind, .. } if kind == "malformed_overlay"
        ));
    }

    #[tokio::test]
    async fn all_or_nothing_aborts_before_writing() {
        let tree = OverlayTree::new().with("a", "6.0.1", "6.0.1").overlay("bad", "- x\n");
        let before = tree.snapshot();

        let err = run(&tree, VersionUpdateRequest::new("6.0.2").all_or_nothing(true))
            .await
            .unwrap_err();

        assert!(matches!(&err, Error::BatchAborted(names) if names == &vec!["bad".to_string()]));
        assert_eq!(tree.snapshot(), before);
    }

    #[tokio::test]
    async fn rolls_back_when_a_write_fails() {
        let tree = OverlayTree::new().with("a", "6.0.1", "6.0.1").with("b", "6.0.1", "6.0.1");
        let config = tree.config();
        let original = tree.read("a");
        let discovery = discover(&config).await.unwrap();
        std::fs::remove_dir_all(tree.root().join("overlays").join("b")).unwrap();

        let request = VersionUpdateRequest::new("6.0.2").all_or_nothing(true);
        let outcome = apply(&config, &discovery, &request).await.unwrap();

        assert_eq!(outcome.record("a").unwrap().status, UpdateStatus::RolledBack);
        assert!(matches!(
            &outcome.record("b").unwrap().status,
            UpdateStatus::Failed { kind, .. } if kind == "write_failure"
        ));
        assert_eq!(tree.read("a"), original);
    }

    #[tokio::test]
    async fn write_failure_does_not_stop_other_overlays() {
        let tree = OverlayTree::new().with("a", "6.0.1", "6.0.1").with("b", "6.0.1", "6.0.1");
        let config = tree.config();
        let discovery = discover(&config).await.unwrap();
        std::fs::remove_dir_all(tree.root().join("overlays").join("a")).unwrap();

        let outcome = apply(&config, &discovery, &VersionUpdateRequest::new("6.0.2")).await.unwrap();

        assert!(outcome.record("a").unwrap().status.is_failure());
        assert_eq!(outcome.record("b").unwrap().status, UpdateStatus::Written);
    }

    #[tokio::test]
    async fn skips_everything_once_the_deadline_passed() {
        let tree = OverlayTree::new().with("a", "6.0.1", "6.0.1").with("b", "6.0.1", "6.0.1");
        let before = tree.snapshot();

        let request = VersionUpdateRequest::new("6.0.2").with_timeout(Some(Duration::ZERO));
        let outcome = run(&tree, request).await.unwrap();

        assert!(outcome
            .records
            .iter()
            .all(|record| matches!(record.status, UpdateStatus::Skipped { .. })));
        assert_eq!(tree.snapshot(), before);
    }

    #[tokio::test]
    async fn inserts_missing_fields() {
        let tree = OverlayTree::new().overlay("bare", "resources:\n  - ../../base\n");

        let outcome = run(&tree, VersionUpdateRequest::new("6.0.2")).await.unwrap();

        assert_eq!(
            tree.read("bare"),
            "resources:\n  - ../../base\n\
             images:\n  - name: docker.io/solidproject/community-server\n    newTag: 6.0.2\n\
             labels:\n  - pairs:\n      app.kubernetes.io/version: 6.0.2\n"
        );
        let changes = &outcome.record("bare").unwrap().changes;
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|change| change.before.is_none()));
    }

    #[tokio::test]
    async fn extends_existing_sections() {
        let source = r#"labels:
  - includeSelectors: true
    pairs:
      app.kubernetes.io/instance: css
images:
  - name: docker.io/library/busybox
    newTag: "1.36"
"#;
        let tree = OverlayTree::new().overlay("a", source);

        run(&tree, VersionUpdateRequest::new("6.0.2")).await.unwrap();

        assert_eq!(
            tree.read("a"),
            r#"labels:
  - includeSelectors: true
    pairs:
      app.kubernetes.io/instance: css
  - pairs:
      app.kubernetes.io/version: 6.0.2
images:
  - name: docker.io/library/busybox
    newTag: "1.36"
  - name: docker.io/solidproject/community-server
    newTag: 6.0.2
"#
        );
    }

    #[tokio::test]
    async fn adds_tag_to_image_entry_without_one() {
        let source = "images:\n- name: docker.io/solidproject/community-server\n  digest: sha256:abc\n\
                      commonLabels:\n  app.kubernetes.io/version: '6.0.1'\n";
        let tree = OverlayTree::new().overlay("a", source);

        run(&tree, VersionUpdateRequest::new("6.0.2")).await.unwrap();

        assert_eq!(
            tree.read("a"),
            "images:\n- name: docker.io/solidproject/community-server\n  newTag: 6.0.2\n  digest: sha256:abc\n\
             commonLabels:\n  app.kubernetes.io/version: '6.0.2'\n"
        );
    }

    #[tokio::test]
    async fn rewrites_label_sites_inside_patches() {
        let source = r#"images:
  - name: docker.io/solidproject/community-server
    newTag: 6.0.1
patches:
  - target:
      kind: Deployment
    patch: |-
      - op: add
        path: /spec/template/metadata/labels/app.kubernetes.io~1version
        value: "6.0.1"
  - patch: |-
      apiVersion: apps/v1
      kind: Deployment
      metadata:
        name: css
        labels:
          app.kubernetes.io/version: 6.0.1
"#;
        let tree = OverlayTree::new().overlay("a", source);

        let outcome = run(&tree, VersionUpdateRequest::new("6.0.2")).await.unwrap();

        assert_eq!(tree.read("a"), source.replace("6.0.1", "6.0.2"));
        let fields = outcome.record("a").unwrap().changes.iter().map(|c| c.field.to_string()).collect::<Vec<_>>();
        assert_eq!(
            fields,
            vec![
                "image tag",
                "version label (patches[0] op 0)",
                "version label (patches[1] metadata.labels)",
            ]
        );
    }

    #[tokio::test]
    async fn updates_documents_with_start_marker() {
        let source = r#"---
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
labels:
  - pairs:
      app.kubernetes.io/version: 6.0.1
images:
  - name: docker.io/solidproject/community-server
    newTag: 6.0.1
"#;
        let tree = OverlayTree::new().overlay("a", source);

        let outcome = run(&tree, VersionUpdateRequest::new("6.0.2")).await.unwrap();

        assert_eq!(outcome.record("a").unwrap().status, UpdateStatus::Written);
        assert_eq!(tree.read("a"), source.replace("6.0.1", "6.0.2"));
    }

    #[tokio::test]
    async fn adds_label_op_to_deployment_patch() {
        let source = r#"resources:
  - ../../base
patches:
  - target:
      kind: Deployment
    patch: |-
      - op: replace
        path: /spec/replicas
        value: 2
"#;
        let tree = OverlayTree::new().overlay("a", source);

        let outcome = run(&tree, VersionUpdateRequest::new("6.0.2")).await.unwrap();

        assert_eq!(
            tree.read("a"),
            format!(
                "{source}      - op: add\n        path: /spec/template/metadata/labels/app.kubernetes.io~1version\n        \
                 value: \"6.0.2\"\nimages:\n  - name: docker.io/solidproject/community-server\n    newTag: 6.0.2\n"
            )
        );
        let record = outcome.record("a").unwrap();
        assert_eq!(record.status, UpdateStatus::Written);
        assert!(record.changes.iter().any(|change| change.field
            == ChangedField::VersionLabel {
                location: LabelLocation::JsonPatch { patch: 0, op: 1 }
            }));
    }

    #[tokio::test]
    async fn refuses_flow_style_sections() {
        let source = "images: [{name: docker.io/solidproject/community-server, newTag: 6.0.1}]\n\
                      commonLabels:\n  app.kubernetes.io/version: 6.0.1\n";
        let tree = OverlayTree::new().overlay("a", source);

        let outcome = run(&tree, VersionUpdateRequest::new("6.0.2")).await.unwrap();

        assert!(matches!(
            &outcome.record("a").unwrap().status,
            UpdateStatus::Failed { kind, .. } if kind == "uneditable_field"
        ));
        assert_eq!(tree.read("a"), source);
    }
}
