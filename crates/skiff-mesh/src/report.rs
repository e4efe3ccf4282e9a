//! Resource validation reports and status
//!
//! Translators, sanitizers and extensions record per-resource outcomes into
//! [`ResourceReports`]. Reports from every stage of a pass are merged into
//! one value which is handed to the [`StatusReporter`].

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use skiff_common::{Result, ResourceKey, SkiffError, WriteOptions};

/// Key of a report entry
pub type ReportKey = ResourceKey;

/// Outcome of validating one resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Version of the resource the report was computed against
    pub resource_version: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Report {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn push_unique(list: &mut Vec<String>, message: String) {
        if !list.contains(&message) {
            list.push(message);
        }
    }
}

/// Reports keyed by resource, ordered by kind then namespace and name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReports {
    entries: BTreeMap<ReportKey, Report>,
}

impl ResourceReports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a resource as seen, leaving any existing outcome in place
    pub fn accept(&mut self, key: ReportKey, resource_version: &str) {
        let report = self.entries.entry(key).or_default();
        if report.resource_version.is_empty() {
            report.resource_version = resource_version.to_string();
        }
    }

    pub fn add_error(&mut self, key: ReportKey, message: impl Into<String>) {
        let report = self.entries.entry(key).or_default();
        Report::push_unique(&mut report.errors, message.into());
    }

    pub fn add_warning(&mut self, key: ReportKey, message: impl Into<String>) {
        let report = self.entries.entry(key).or_default();
        Report::push_unique(&mut report.warnings, message.into());
    }

    pub fn get(&self, key: &ReportKey) -> Option<&Report> {
        self.entries.get(key)
    }

    /// True when any resource has errors
    pub fn has_errors(&self) -> bool {
        self.entries.values().any(Report::has_errors)
    }

    /// True when the given resource has errors
    pub fn has_errors_for(&self, key: &ReportKey) -> bool {
        self.entries.get(key).is_some_and(Report::has_errors)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReportKey, &Report)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` into `self`
    ///
    /// Keys are unioned. For keys present on both sides errors and warnings
    /// are appended after the existing ones, dropping duplicates. When both
    /// sides computed their report against different non-empty resource
    /// versions, the existing entry is kept unchanged and the key is
    /// returned in a [`SkiffError::ReportMergeConflict`] once every other
    /// entry has been merged.
    pub fn merge(&mut self, other: ResourceReports) -> Result<()> {
        let mut conflicts = Vec::new();

        for (key, incoming) in other.entries {
            match self.entries.get_mut(&key) {
                None => {
                    self.entries.insert(key, incoming);
                }
                Some(existing) => {
                    if !existing.resource_version.is_empty()
                        && !incoming.resource_version.is_empty()
                        && existing.resource_version != incoming.resource_version
                    {
                        conflicts.push(format!(
                            "{} (versions {} and {})",
                            key, existing.resource_version, incoming.resource_version
                        ));
                        continue;
                    }
                    if existing.resource_version.is_empty() {
                        existing.resource_version = incoming.resource_version;
                    }
                    for error in incoming.errors {
                        Report::push_unique(&mut existing.errors, error);
                    }
                    for warning in incoming.warnings {
                        Report::push_unique(&mut existing.warnings, warning);
                    }
                }
            }
        }

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(SkiffError::ReportMergeConflict(conflicts.join(", ")))
        }
    }

    /// Errors of every rejected resource, as `"<key>: <message>"`
    pub fn error_messages(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|(key, report)| report.errors.iter().map(move |e| format!("{}: {}", key, e)))
            .collect()
    }
}

/// Status state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusState {
    Accepted,
    Warning,
    Rejected,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Accepted => "Accepted",
            StatusState::Warning => "Warning",
            StatusState::Rejected => "Rejected",
        }
    }
}

impl Display for StatusState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status written back to a declarative resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub state: StatusState,
    pub reason: String,
    /// Controller that computed the status
    pub reported_by: String,
}

/// Status/report store collaborator
#[async_trait::async_trait]
pub trait StatusReporter: Send + Sync {
    /// Persist the statuses derived from `reports`
    async fn write_reports(&self, reports: &ResourceReports, opts: &WriteOptions) -> Result<()>;

    /// Derive the status of one resource from its report
    fn status_from_report(&self, report: &Report) -> Status;
}

/// Status derivation shared by reporters
pub fn status_from_report(report: &Report, reported_by: &str) -> Status {
    let (state, reason) = if report.has_errors() {
        (StatusState::Rejected, report.errors.join("\n"))
    } else if !report.warnings.is_empty() {
        (StatusState::Warning, report.warnings.join("\n"))
    } else {
        (StatusState::Accepted, String::new())
    };
    Status {
        state,
        reason,
        reported_by: reported_by.to_string(),
    }
}

/// Reporter keeping the latest status per resource in memory
pub struct InMemoryStatusReporter {
    reported_by: String,
    statuses: DashMap<ReportKey, Status>,
}

impl InMemoryStatusReporter {
    pub fn new(reported_by: impl Into<String>) -> Self {
        Self {
            reported_by: reported_by.into(),
            statuses: DashMap::new(),
        }
    }

    pub fn status(&self, key: &ReportKey) -> Option<Status> {
        self.statuses.get(key).map(|s| s.clone())
    }

    /// All statuses ordered by key
    pub fn statuses(&self) -> BTreeMap<ReportKey, Status> {
        self.statuses
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl StatusReporter for InMemoryStatusReporter {
    async fn write_reports(&self, reports: &ResourceReports, _opts: &WriteOptions) -> Result<()> {
        for (key, report) in reports.iter() {
            self.statuses
                .insert(key.clone(), self.status_from_report(report));
        }
        Ok(())
    }

    fn status_from_report(&self, report: &Report) -> Status {
        status_from_report(report, &self.reported_by)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_common::{ResourceKind, ResourceRef};

    fn vs_key(name: &str) -> ReportKey {
        ReportKey::new(ResourceKind::VirtualService, ResourceRef::new("default", name))
    }

    #[test]
    fn test_accept_and_errors() {
        let mut reports = ResourceReports::new();
        reports.accept(vs_key("a"), "1");
        assert!(!reports.has_errors());

        reports.add_error(vs_key("a"), "bad route");
        reports.add_error(vs_key("a"), "bad route");
        assert!(reports.has_errors_for(&vs_key("a")));
        assert_eq!(reports.get(&vs_key("a")).unwrap().errors.len(), 1);

        reports.accept(vs_key("a"), "2");
        assert_eq!(reports.get(&vs_key("a")).unwrap().resource_version, "1");
    }

    #[test]
    fn test_merge_unions_keys_and_messages() {
        let mut base = ResourceReports::new();
        base.add_error(vs_key("x"), "translation failed");
        base.add_warning(vs_key("shared"), "first");

        let mut extension = ResourceReports::new();
        extension.add_error(vs_key("y"), "extension rejected");
        extension.add_warning(vs_key("shared"), "first");
        extension.add_warning(vs_key("shared"), "second");

        base.merge(extension).unwrap();

        assert_eq!(base.len(), 3);
        assert!(base.has_errors_for(&vs_key("x")));
        assert!(base.has_errors_for(&vs_key("y")));
        assert_eq!(
            base.get(&vs_key("shared")).unwrap().warnings,
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn test_merge_version_conflict_keeps_existing() {
        let mut base = ResourceReports::new();
        base.accept(vs_key("a"), "1");
        base.add_warning(vs_key("a"), "kept");

        let mut other = ResourceReports::new();
        other.accept(vs_key("a"), "2");
        other.add_error(vs_key("a"), "dropped");
        other.add_error(vs_key("b"), "merged");

        let err = base.merge(other).unwrap_err();
        assert!(matches!(err, SkiffError::ReportMergeConflict(_)));
        assert!(!base.has_errors_for(&vs_key("a")));
        assert!(base.has_errors_for(&vs_key("b")));
    }

    #[test]
    fn test_status_from_report() {
        let mut report = Report::default();
        assert_eq!(status_from_report(&report, "gw").state, StatusState::Accepted);

        report.warnings.push("w".to_string());
        assert_eq!(status_from_report(&report, "gw").state, StatusState::Warning);

        report.errors.push("e1".to_string());
        report.errors.push("e2".to_string());
        let status = status_from_report(&report, "gw");
        assert_eq!(status.state, StatusState::Rejected);
        assert_eq!(status.reason, "e1\ne2");
        assert_eq!(status.reported_by, "gw");
    }

    #[tokio::test]
    async fn test_in_memory_reporter() {
        let reporter = InMemoryStatusReporter::new("skiff-gateway");
        let mut reports = ResourceReports::new();
        reports.accept(vs_key("ok"), "1");
        reports.add_error(vs_key("bad"), "boom");

        reporter
            .write_reports(&reports, &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(
            reporter.status(&vs_key("ok")).unwrap().state,
            StatusState::Accepted
        );
        assert_eq!(
            reporter.status(&vs_key("bad")).unwrap().state,
            StatusState::Rejected
        );
        assert_eq!(reporter.statuses().len(), 2);
    }
}
