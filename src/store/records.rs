//! Domain records for the dashboard collections
//!
//! Each entity family carries a stable integer id, a status enumeration,
//! and RFC 3339 timestamps. Deltas arrive as explicit partial-record types
//! (`*Patch`) so an omitted field is distinguishable from an explicitly-null
//! one: omitted fields are preserved on merge, present fields win.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Filter, Record};

/// Deserialize a `*Patch` double-option field so that an explicitly-null JSON
/// value (`"field": null`) yields `Some(None)` (clear the field) while an
/// omitted field — handled by `#[serde(default)]`, which skips this function —
/// yields `None` (preserve the field on merge).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Scan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Finding severity, ordered from most to least urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

/// Triage status of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Open,
    Confirmed,
    Resolved,
    FalsePositive,
}

/// Kind of AI-generated insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    RiskSummary,
    Remediation,
    Anomaly,
}

// ============================================================================
// Project
// ============================================================================

/// A scan target grouping (repository, host group, application)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub scan_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial project delta
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectPatch {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub owner: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Project {
    type Patch = ProjectPatch;

    fn id(&self) -> u64 {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn patch_id(patch: &ProjectPatch) -> u64 {
        patch.id
    }

    fn patch_updated_at(patch: &ProjectPatch) -> Option<DateTime<Utc>> {
        patch.updated_at
    }

    fn merge(&mut self, patch: ProjectPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(owner) = patch.owner {
            self.owner = owner;
        }
        if let Some(scan_count) = patch.scan_count {
            self.scan_count = scan_count;
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }

    fn materialize(patch: ProjectPatch) -> Self {
        let now = patch
            .updated_at
            .or(patch.created_at)
            .unwrap_or_else(Utc::now);
        Self {
            id: patch.id,
            name: patch.name.unwrap_or_default(),
            description: patch.description.unwrap_or_default(),
            owner: patch.owner.unwrap_or_default(),
            scan_count: patch.scan_count.unwrap_or_default(),
            created_at: patch.created_at.unwrap_or(now),
            updated_at: patch.updated_at.unwrap_or(now),
        }
    }
}

/// Project filter facets
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub search: Option<String>,
    pub owner: Option<String>,
}

/// Partial update for [`ProjectFilter`]
#[derive(Debug, Clone, Default)]
pub struct ProjectFilterUpdate {
    pub search: Option<Option<String>>,
    pub owner: Option<Option<String>>,
}

impl Filter<Project> for ProjectFilter {
    type Update = ProjectFilterUpdate;

    fn merge(&mut self, update: ProjectFilterUpdate) {
        if let Some(search) = update.search {
            self.search = search;
        }
        if let Some(owner) = update.owner {
            self.owner = owner;
        }
    }

    fn matches(&self, record: &Project) -> bool {
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = record.name.to_lowercase().contains(&needle)
                || record
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if record.owner.as_deref() != Some(owner.as_str()) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Scan
// ============================================================================

/// One execution of the scanner against a target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: u64,
    #[serde(default)]
    pub project_id: Option<u64>,
    pub target: String,
    pub status: ScanStatus,
    /// Completion percentage, 0-100
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub findings_count: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial scan delta
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanPatch {
    pub id: u64,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ScanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings_count: Option<u64>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Scan {
    type Patch = ScanPatch;

    fn id(&self) -> u64 {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn patch_id(patch: &ScanPatch) -> u64 {
        patch.id
    }

    fn patch_updated_at(patch: &ScanPatch) -> Option<DateTime<Utc>> {
        patch.updated_at
    }

    fn merge(&mut self, patch: ScanPatch) {
        if let Some(project_id) = patch.project_id {
            self.project_id = project_id;
        }
        if let Some(target) = patch.target {
            self.target = target;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        if let Some(findings_count) = patch.findings_count {
            self.findings_count = findings_count;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = started_at;
        }
        if let Some(finished_at) = patch.finished_at {
            self.finished_at = finished_at;
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }

    fn materialize(patch: ScanPatch) -> Self {
        let now = patch
            .updated_at
            .or(patch.created_at)
            .unwrap_or_else(Utc::now);
        Self {
            id: patch.id,
            project_id: patch.project_id.unwrap_or_default(),
            target: patch.target.unwrap_or_default(),
            status: patch.status.unwrap_or(ScanStatus::Queued),
            progress: patch.progress.unwrap_or_default().min(100),
            findings_count: patch.findings_count.unwrap_or_default(),
            started_at: patch.started_at.unwrap_or_default(),
            finished_at: patch.finished_at.unwrap_or_default(),
            created_at: patch.created_at.unwrap_or(now),
            updated_at: patch.updated_at.unwrap_or(now),
        }
    }
}

/// Scan filter facets
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub search: Option<String>,
    /// Empty set admits every status
    pub statuses: Vec<ScanStatus>,
    pub project_id: Option<u64>,
}

/// Partial update for [`ScanFilter`]
#[derive(Debug, Clone, Default)]
pub struct ScanFilterUpdate {
    pub search: Option<Option<String>>,
    pub statuses: Option<Vec<ScanStatus>>,
    pub project_id: Option<Option<u64>>,
}

impl Filter<Scan> for ScanFilter {
    type Update = ScanFilterUpdate;

    fn merge(&mut self, update: ScanFilterUpdate) {
        if let Some(search) = update.search {
            self.search = search;
        }
        if let Some(statuses) = update.statuses {
            self.statuses = statuses;
        }
        if let Some(project_id) = update.project_id {
            self.project_id = project_id;
        }
    }

    fn matches(&self, record: &Scan) -> bool {
        if let Some(search) = &self.search {
            if !record
                .target
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if let Some(project_id) = self.project_id {
            if record.project_id != Some(project_id) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Finding
// ============================================================================

/// A single vulnerability or observation produced by a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: u64,
    #[serde(default)]
    pub scan_id: Option<u64>,
    pub title: String,
    pub severity: Severity,
    pub status: FindingStatus,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub cvss: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial finding delta
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingPatch {
    pub id: u64,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FindingStatus>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub cvss: Option<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Finding {
    type Patch = FindingPatch;

    fn id(&self) -> u64 {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn patch_id(patch: &FindingPatch) -> u64 {
        patch.id
    }

    fn patch_updated_at(patch: &FindingPatch) -> Option<DateTime<Utc>> {
        patch.updated_at
    }

    fn merge(&mut self, patch: FindingPatch) {
        if let Some(scan_id) = patch.scan_id {
            self.scan_id = scan_id;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(severity) = patch.severity {
            self.severity = severity;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(cvss) = patch.cvss {
            self.cvss = cvss;
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }

    fn materialize(patch: FindingPatch) -> Self {
        let now = patch
            .updated_at
            .or(patch.created_at)
            .unwrap_or_else(Utc::now);
        Self {
            id: patch.id,
            scan_id: patch.scan_id.unwrap_or_default(),
            title: patch.title.unwrap_or_default(),
            severity: patch.severity.unwrap_or(Severity::Info),
            status: patch.status.unwrap_or(FindingStatus::Open),
            category: patch.category.unwrap_or_default(),
            cvss: patch.cvss.unwrap_or_default(),
            created_at: patch.created_at.unwrap_or(now),
            updated_at: patch.updated_at.unwrap_or(now),
        }
    }
}

/// Finding filter facets
#[derive(Debug, Clone, Default)]
pub struct FindingFilter {
    pub search: Option<String>,
    /// Empty set admits every severity
    pub severities: Vec<Severity>,
    /// Empty set admits every status
    pub statuses: Vec<FindingStatus>,
    pub scan_id: Option<u64>,
}

/// Partial update for [`FindingFilter`]
#[derive(Debug, Clone, Default)]
pub struct FindingFilterUpdate {
    pub search: Option<Option<String>>,
    pub severities: Option<Vec<Severity>>,
    pub statuses: Option<Vec<FindingStatus>>,
    pub scan_id: Option<Option<u64>>,
}

impl Filter<Finding> for FindingFilter {
    type Update = FindingFilterUpdate;

    fn merge(&mut self, update: FindingFilterUpdate) {
        if let Some(search) = update.search {
            self.search = search;
        }
        if let Some(severities) = update.severities {
            self.severities = severities;
        }
        if let Some(statuses) = update.statuses {
            self.statuses = statuses;
        }
        if let Some(scan_id) = update.scan_id {
            self.scan_id = scan_id;
        }
    }

    fn matches(&self, record: &Finding) -> bool {
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = record.title.to_lowercase().contains(&needle)
                || record
                    .category
                    .as_deref()
                    .is_some_and(|c| c.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if !self.severities.is_empty() && !self.severities.contains(&record.severity) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if let Some(scan_id) = self.scan_id {
            if record.scan_id != Some(scan_id) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// AI Insight
// ============================================================================

/// Model-generated analysis attached to a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiInsight {
    pub id: u64,
    #[serde(default)]
    pub scan_id: Option<u64>,
    pub kind: InsightKind,
    #[serde(default)]
    pub model: String,
    pub summary: String,
    /// Model confidence, 0.0-1.0
    #[serde(default)]
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial insight delta
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiInsightPatch {
    pub id: u64,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<InsightKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for AiInsight {
    type Patch = AiInsightPatch;

    fn id(&self) -> u64 {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn patch_id(patch: &AiInsightPatch) -> u64 {
        patch.id
    }

    fn patch_updated_at(patch: &AiInsightPatch) -> Option<DateTime<Utc>> {
        patch.updated_at
    }

    fn merge(&mut self, patch: AiInsightPatch) {
        if let Some(scan_id) = patch.scan_id {
            self.scan_id = scan_id;
        }
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(summary) = patch.summary {
            self.summary = summary;
        }
        if let Some(confidence) = patch.confidence {
            self.confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }

    fn materialize(patch: AiInsightPatch) -> Self {
        let now = patch
            .updated_at
            .or(patch.created_at)
            .unwrap_or_else(Utc::now);
        Self {
            id: patch.id,
            scan_id: patch.scan_id.unwrap_or_default(),
            kind: patch.kind.unwrap_or(InsightKind::RiskSummary),
            model: patch.model.unwrap_or_default(),
            summary: patch.summary.unwrap_or_default(),
            confidence: patch.confidence.unwrap_or_default().clamp(0.0, 1.0),
            created_at: patch.created_at.unwrap_or(now),
            updated_at: patch.updated_at.unwrap_or(now),
        }
    }
}

/// Insight filter facets
#[derive(Debug, Clone, Default)]
pub struct InsightFilter {
    /// Empty set admits every kind
    pub kinds: Vec<InsightKind>,
    pub scan_id: Option<u64>,
    pub min_confidence: Option<f64>,
}

/// Partial update for [`InsightFilter`]
#[derive(Debug, Clone, Default)]
pub struct InsightFilterUpdate {
    pub kinds: Option<Vec<InsightKind>>,
    pub scan_id: Option<Option<u64>>,
    pub min_confidence: Option<Option<f64>>,
}

impl Filter<AiInsight> for InsightFilter {
    type Update = InsightFilterUpdate;

    fn merge(&mut self, update: InsightFilterUpdate) {
        if let Some(kinds) = update.kinds {
            self.kinds = kinds;
        }
        if let Some(scan_id) = update.scan_id {
            self.scan_id = scan_id;
        }
        if let Some(min_confidence) = update.min_confidence {
            self.min_confidence = min_confidence;
        }
    }

    fn matches(&self, record: &AiInsight) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind) {
            return false;
        }
        if let Some(scan_id) = self.scan_id {
            if record.scan_id != Some(scan_id) {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if record.confidence < min {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_scan_patch_parse() {
        let json = r#"{"id":1,"status":"completed","progress":100}"#;
        let patch: ScanPatch = serde_json::from_str(json).unwrap();
        assert_eq!(patch.id, 1);
        assert_eq!(patch.status, Some(ScanStatus::Completed));
        assert_eq!(patch.progress, Some(100));
        assert!(patch.target.is_none());
    }

    #[test]
    fn test_merge_preserves_omitted_fields() {
        let mut scan = Scan::materialize(ScanPatch {
            id: 7,
            target: Some("10.0.0.0/24".into()),
            status: Some(ScanStatus::Running),
            progress: Some(40),
            created_at: Some(ts(100)),
            updated_at: Some(ts(100)),
            ..Default::default()
        });

        scan.merge(ScanPatch {
            id: 7,
            status: Some(ScanStatus::Completed),
            updated_at: Some(ts(200)),
            ..Default::default()
        });

        assert_eq!(scan.status, ScanStatus::Completed);
        // Omitted fields survive the merge
        assert_eq!(scan.target, "10.0.0.0/24");
        assert_eq!(scan.progress, 40);
        assert_eq!(scan.created_at, ts(100));
        assert_eq!(scan.updated_at, ts(200));
    }

    #[test]
    fn test_explicit_null_clears_field() {
        let mut finding = Finding::materialize(FindingPatch {
            id: 3,
            title: Some("Weak cipher".into()),
            category: Some(Some("tls".into())),
            ..Default::default()
        });
        assert_eq!(finding.category.as_deref(), Some("tls"));

        // `"category": null` deserializes to Some(None): clear the field
        let patch: FindingPatch =
            serde_json::from_str(r#"{"id":3,"category":null}"#).unwrap();
        finding.merge(patch);
        assert_eq!(finding.category, None);
    }

    #[test]
    fn test_finding_filter_severity_set() {
        let finding = Finding::materialize(FindingPatch {
            id: 1,
            title: Some("SQL injection".into()),
            severity: Some(Severity::Critical),
            ..Default::default()
        });

        let mut filter = FindingFilter::default();
        assert!(filter.matches(&finding));

        filter.merge(FindingFilterUpdate {
            severities: Some(vec![Severity::Critical, Severity::High]),
            ..Default::default()
        });
        assert!(filter.matches(&finding));

        filter.merge(FindingFilterUpdate {
            severities: Some(vec![Severity::Low]),
            ..Default::default()
        });
        assert!(!filter.matches(&finding));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let project = Project::materialize(ProjectPatch {
            id: 1,
            name: Some("Payments API".into()),
            ..Default::default()
        });

        let mut filter = ProjectFilter::default();
        filter.merge(ProjectFilterUpdate {
            search: Some(Some("payments".into())),
            ..Default::default()
        });
        assert!(filter.matches(&project));

        filter.merge(ProjectFilterUpdate {
            search: Some(Some("billing".into())),
            ..Default::default()
        });
        assert!(!filter.matches(&project));
    }
}
