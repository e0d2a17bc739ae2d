use pipeline_core::Error;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const VERSION_PATTERN: &str = r"^[0-9]+\.[0-9]+\.[0-9]+(-[a-zA-Z0-9.-]+)?$";
static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(VERSION_PATTERN).expect("version pattern compiles"));

/// `MAJOR.MINOR.PATCH` with an optional `-prerelease` suffix.
pub fn is_valid_version(version: &str) -> bool {
    VERSION_RE.is_match(version)
}

pub fn ensure_valid_version(version: &str) -> Result<(), Error> {
    if is_valid_version(version) {
        Ok(())
    } else {
        Err(Error::InvalidVersionFormat(version.to_string()))
    }
}

/// Where inside a kustomization a version label is asserted.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum LabelLocation {
    /// `labels[index].pairs`
    Labels { index: usize },
    CommonLabels,
    /// A JSON6902 operation inside an inline Deployment patch.
    JsonPatch { patch: usize, op: usize },
    /// A strategic merge patch setting the label under `path`.
    MergePatch { patch: usize, path: String },
}

impl fmt::Display for LabelLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelLocation::Labels { index } => write!(f, "labels[{index}].pairs"),
            LabelLocation::CommonLabels => write!(f, "commonLabels"),
            LabelLocation::JsonPatch { patch, op } => write!(f, "patches[{patch}] op {op}"),
            LabelLocation::MergePatch { patch, path } => write!(f, "patches[{patch}] {path}"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct LabelSite {
    pub location: LabelLocation,
    pub value: String,
}

/// A deployment variant under `overlays/<name>/`, with the version fields
/// pulled out of its kustomization.
#[derive(Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub name: String,
    pub path: PathBuf,
    pub instance_label: Option<String>,
    pub image_tag: Option<String>,
    /// First version label site in document order.
    pub version_label: Option<String>,
    pub version_label_sites: Vec<LabelSite>,
    /// Document text as read, the base for structural edits.
    #[serde(skip)]
    #[schemars(skip)]
    pub(crate) source: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct MalformedOverlay {
    pub name: String,
    pub path: PathBuf,
    pub reason: String,
}

impl From<&MalformedOverlay> for Error {
    fn from(overlay: &MalformedOverlay) -> Self {
        Error::MalformedOverlay {
            overlay: overlay.name.clone(),
            reason: overlay.reason.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DiscoveredOverlay {
    Found(Overlay),
    Malformed(MalformedOverlay),
}

impl DiscoveredOverlay {
    pub fn name(&self) -> &str {
        match self {
            DiscoveredOverlay::Found(overlay) => &overlay.name,
            DiscoveredOverlay::Malformed(malformed) => &malformed.name,
        }
    }
}

/// Result of scanning `overlays/`; one slot per directory in name order.
#[derive(Clone, Debug, PartialEq)]
pub struct Discovery {
    pub root: PathBuf,
    pub entries: Vec<DiscoveredOverlay>,
}

impl Discovery {
    pub fn overlays(&self) -> impl Iterator<Item = &Overlay> {
        self.entries.iter().filter_map(|entry| match entry {
            DiscoveredOverlay::Found(overlay) => Some(overlay),
            DiscoveredOverlay::Malformed(_) => None,
        })
    }

    pub fn malformed(&self) -> impl Iterator<Item = &MalformedOverlay> {
        self.entries.iter().filter_map(|entry| match entry {
            DiscoveredOverlay::Found(_) => None,
            DiscoveredOverlay::Malformed(malformed) => Some(malformed),
        })
    }

    pub fn get(&self, name: &str) -> Option<&DiscoveredOverlay> {
        self.entries.iter().find(|entry| entry.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(DiscoveredOverlay::name).collect()
    }
}

/// How the image tag and the version label relate to each other.
#[derive(Deserialize, Serialize, Copy, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ConsistencyPolicy {
    /// Both fields must carry the same version.
    #[default]
    Matching,
    /// Both fields must be present and well formed, but may differ. When the
    /// project version is known the label must equal it.
    Independent,
}

impl FromStr for ConsistencyPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "matching" | "equal" => Ok(ConsistencyPolicy::Matching),
            "independent" => Ok(ConsistencyPolicy::Independent),
            other => Err(Error::InvalidConfig(format!("unknown consistency policy: {other}"))),
        }
    }
}

impl fmt::Display for ConsistencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyPolicy::Matching => write!(f, "matching"),
            ConsistencyPolicy::Independent => write!(f, "independent"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Issue {
    MissingImageTag,
    MissingVersionLabel,
    InvalidImageTag {
        value: String,
    },
    InvalidVersionLabel {
        value: String,
    },
    #[serde(rename_all = "camelCase")]
    Mismatch {
        image_tag: String,
        version_label: String,
    },
    LabelSitesDisagree {
        sites: Vec<LabelSite>,
    },
    #[serde(rename_all = "camelCase")]
    LabelNotProjectVersion {
        version_label: String,
        project_version: String,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::MissingImageTag => write!(f, "missing image tag"),
            Issue::MissingVersionLabel => write!(f, "missing version label"),
            Issue::InvalidImageTag { value } => write!(f, "image tag '{value}' is not X.Y.Z[-prerelease]"),
            Issue::InvalidVersionLabel { value } => {
                write!(f, "version label '{value}' is not X.Y.Z[-prerelease]")
            }
            Issue::Mismatch {
                image_tag,
                version_label,
            } => write!(f, "image tag '{image_tag}' != version label '{version_label}'"),
            Issue::LabelSitesDisagree { sites } => {
                let sites = sites
                    .iter()
                    .map(|site| format!("{}='{}'", site.location, site.value))
                    .collect::<Vec<_>>();
                write!(f, "version label sites disagree: {}", sites.join(", "))
            }
            Issue::LabelNotProjectVersion {
                version_label,
                project_version,
            } => write!(f, "version label '{version_label}' != project version '{project_version}'"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VersionReport {
    pub overlay_name: String,
    pub instance_label: Option<String>,
    pub image_tag: Option<String>,
    pub version_label: Option<String>,
    pub consistent: bool,
    pub issues: Vec<Issue>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ValidationWarning {
    /// Overlays sharing an instance label cannot be deployed side by side.
    DuplicateInstanceLabel { label: String, overlays: Vec<String> },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::DuplicateInstanceLabel { label, overlays } => write!(
                f,
                "instance label '{label}' is shared by {}",
                overlays.join(", ")
            ),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub overall_consistent: bool,
    pub policy: ConsistencyPolicy,
    /// Version the labels were held against, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_version: Option<String>,
    pub reports: Vec<VersionReport>,
    pub malformed: Vec<MalformedOverlay>,
    pub warnings: Vec<ValidationWarning>,
    pub generated_at: DateTime<Utc>,
}

impl ValidationOutcome {
    pub fn report(&self, overlay: &str) -> Option<&VersionReport> {
        self.reports.iter().find(|report| report.overlay_name == overlay)
    }

    pub fn inconsistent(&self) -> impl Iterator<Item = &VersionReport> {
        self.reports.iter().filter(|report| !report.consistent)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum UpdateScope {
    #[default]
    All,
    Overlay(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VersionUpdateRequest {
    pub target_version: String,
    pub scope: UpdateScope,
    pub dry_run: bool,
    /// Abort before writing if any overlay cannot be planned, and roll back
    /// written overlays if a later write fails.
    pub all_or_nothing: bool,
    /// Overlays not started before this much time has passed are skipped.
    pub timeout: Option<Duration>,
}

impl VersionUpdateRequest {
    pub fn new(target_version: impl Into<String>) -> Self {
        Self {
            target_version: target_version.into(),
            scope: UpdateScope::All,
            dry_run: false,
            all_or_nothing: false,
            timeout: None,
        }
    }

    pub fn for_overlay(mut self, name: impl Into<String>) -> Self {
        self.scope = UpdateScope::Overlay(name.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn all_or_nothing(mut self, all_or_nothing: bool) -> Self {
        self.all_or_nothing = all_or_nothing;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "field")]
pub enum ChangedField {
    ImageTag,
    VersionLabel { location: LabelLocation },
}

impl fmt::Display for ChangedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangedField::ImageTag => write!(f, "image tag"),
            ChangedField::VersionLabel { location } => write!(f, "version label ({location})"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct FieldChange {
    #[serde(flatten)]
    pub field: ChangedField,
    pub before: Option<String>,
    pub after: String,
}

/// One changed region of a file. `line` is the 1-based original line that
/// was replaced, or the line after which `added` was inserted.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct LineEdit {
    pub line: usize,
    pub removed: Option<String>,
    pub added: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum UpdateStatus {
    /// Already on the target version, nothing to write.
    Unchanged,
    /// Computed but not written (dry run).
    Pending,
    Written,
    /// Written, then restored because the batch was all-or-nothing.
    RolledBack,
    Skipped { reason: String },
    Failed { kind: String, message: String },
}

impl UpdateStatus {
    pub fn failed(err: &Error) -> Self {
        UpdateStatus::Failed {
            kind: err.kind_label().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, UpdateStatus::Failed { .. } | UpdateStatus::Skipped { .. })
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub overlay_name: String,
    pub path: PathBuf,
    pub changes: Vec<FieldChange>,
    pub edits: Vec<LineEdit>,
    pub status: UpdateStatus,
}

impl ChangeRecord {
    pub fn failed(overlay_name: impl Into<String>, path: impl Into<PathBuf>, err: &Error) -> Self {
        Self {
            overlay_name: overlay_name.into(),
            path: path.into(),
            changes: Vec::new(),
            edits: Vec::new(),
            status: UpdateStatus::failed(err),
        }
    }

    /// Unified-style rendering of `edits`.
    pub fn diff(&self) -> String {
        let mut out = format!("--- {}\n+++ {}\n", self.path.display(), self.path.display());
        for edit in &self.edits {
            out.push_str(&format!("@@ line {} @@\n", edit.line));
            if let Some(removed) = &edit.removed {
                out.push_str(&format!("-{removed}\n"));
            }
            for added in &edit.added {
                out.push_str(&format!("+{added}\n"));
            }
        }
        out
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub target_version: String,
    pub dry_run: bool,
    pub records: Vec<ChangeRecord>,
    pub generated_at: DateTime<Utc>,
}

impl UpdateOutcome {
    pub fn failed(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter().filter(|record| record.status.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn record(&self, overlay: &str) -> Option<&ChangeRecord> {
        self.records.iter().find(|record| record.overlay_name == overlay)
    }
}
