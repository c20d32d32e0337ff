use crate::domain::models::SyncWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Linked,
    Unlinked,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct KindCounts {
    pub linked: usize,
    pub unlinked: usize,
}

impl KindCounts {
    fn bump(&mut self, kind: CandidateKind) {
        match kind {
            CandidateKind::Linked => self.linked += 1,
            CandidateKind::Unlinked => self.unlinked += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.linked + self.unlinked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Unparseable,
    OrphanedJob,
    PersistenceFailure,
    ProviderFailure,
    DriftFailure,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    pub kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub message: String,
}

impl SyncIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            calendar_id: None,
            event_id: None,
            job_id: None,
            message: message.into(),
        }
    }

    pub fn calendar(mut self, calendar_id: &str) -> Self {
        self.calendar_id = Some(calendar_id.to_string());
        self
    }

    pub fn event(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }
}

/// Outcome of one inbound pass. Field names are consumed by dashboards.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub created: KindCounts,
    pub updated: KindCounts,
    pub skipped: usize,
    pub by_kind: BTreeMap<IssueKind, usize>,
    pub calendars: Vec<String>,
    pub issues: Vec<SyncIssue>,
}

impl SyncResult {
    pub fn record_created(&mut self, kind: CandidateKind) {
        self.created.bump(kind);
    }

    pub fn record_updated(&mut self, kind: CandidateKind) {
        self.updated.bump(kind);
    }

    /// An event that was fetched but not applied, either skipped or failed to write.
    pub fn record_skipped(&mut self, issue: SyncIssue) {
        self.skipped += 1;
        self.record_issue(issue);
    }

    /// A remote event marked cancelled; treated as absent, not as a problem.
    pub fn record_skipped_cancelled(&mut self) {
        self.skipped += 1;
    }

    /// A whole calendar could not be fetched; no event is counted.
    pub fn record_calendar_failure(&mut self, issue: SyncIssue) {
        self.record_issue(issue);
    }

    pub fn record_calendar_synced(&mut self, calendar_id: &str) {
        self.calendars.push(calendar_id.to_string());
    }

    pub fn count_of(&self, kind: IssueKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn processed(&self) -> usize {
        self.created.total() + self.updated.total() + self.skipped
    }

    fn record_issue(&mut self, issue: SyncIssue) {
        *self.by_kind.entry(issue.kind).or_insert(0) += 1;
        self.issues.push(issue);
    }
}

/// Outcome of one cancellation/reschedule pass. Field names are consumed by dashboards.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriftResult {
    pub cancelled: usize,
    pub uncancelled: usize,
    pub rescheduled: usize,
    pub completed_but_rescheduled: usize,
    pub failed: usize,
    pub cancellation_suppressed: bool,
    pub issues: Vec<SyncIssue>,
}

impl DriftResult {
    pub fn record_failure(&mut self, issue: SyncIssue) {
        self.failed += 1;
        self.issues.push(issue);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncPassReport {
    pub window: SyncWindow,
    pub inbound: SyncResult,
    pub drift: DriftResult,
}

/// Remote ids seen during one inbound pass, with the start time each was seen at.
///
/// An id maps to `None` when the event was present but had no usable time.
/// Ids are not qualified by calendar: jobs only record the remote id, so an
/// event shared onto several synced calendars occupies one slot and the first
/// usable start time observed for it wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvents {
    window: SyncWindow,
    starts: HashMap<String, Option<DateTime<Utc>>>,
    complete: bool,
}

impl ObservedEvents {
    pub fn new(window: SyncWindow) -> Self {
        Self {
            window,
            starts: HashMap::new(),
            complete: true,
        }
    }

    pub fn window(&self) -> SyncWindow {
        self.window
    }

    pub fn observe(&mut self, remote_event_id: &str, start: Option<DateTime<Utc>>) {
        let entry = self
            .starts
            .entry(remote_event_id.to_string())
            .or_insert(None);
        if entry.is_none() {
            *entry = start;
        }
    }

    /// `None` when the id was not observed; `Some(None)` when observed without a time.
    pub fn lookup(&self, remote_event_id: &str) -> Option<Option<DateTime<Utc>>> {
        self.starts.get(remote_event_id).copied()
    }

    pub fn contains(&self, remote_event_id: &str) -> bool {
        self.starts.contains_key(remote_event_id)
    }

    pub fn mark_incomplete(&mut self) {
        self.complete = false;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> SyncWindow {
        let start = DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        SyncWindow::new(start, start + chrono::Duration::days(7)).expect("window")
    }

    #[test]
    fn skipped_events_are_counted_by_kind() {
        let mut result = SyncResult::default();
        result.record_created(CandidateKind::Linked);
        result.record_updated(CandidateKind::Unlinked);
        result.record_skipped(SyncIssue::new(IssueKind::OrphanedJob, "job missing").job("J9"));
        result.record_skipped(SyncIssue::new(IssueKind::Unparseable, "no start"));
        result.record_calendar_failure(SyncIssue::new(IssueKind::ProviderFailure, "timeout"));

        assert_eq!(result.skipped, 2);
        assert_eq!(result.processed(), 4);
        assert_eq!(result.count_of(IssueKind::OrphanedJob), 1);
        assert_eq!(result.count_of(IssueKind::ProviderFailure), 1);
        assert_eq!(result.issues.len(), 3);
    }

    #[test]
    fn result_serializes_with_stable_field_names() {
        let mut result = SyncResult::default();
        result.record_created(CandidateKind::Linked);
        result.record_skipped(SyncIssue::new(IssueKind::OrphanedJob, "job missing"));
        let json = serde_json::to_value(&result).expect("serialize");

        assert_eq!(json["created"]["linked"], 1);
        assert_eq!(json["updated"]["unlinked"], 0);
        assert_eq!(json["skipped"], 1);
        assert_eq!(json["byKind"]["orphaned_job"], 1);

        let drift = serde_json::to_value(DriftResult {
            completed_but_rescheduled: 2,
            ..DriftResult::default()
        })
        .expect("serialize drift");
        assert_eq!(drift["completedButRescheduled"], 2);
        assert_eq!(drift["cancelled"], 0);
        assert_eq!(drift["uncancelled"], 0);
        assert_eq!(drift["rescheduled"], 0);
    }

    #[test]
    fn observation_keeps_first_usable_start() {
        let mut observed = ObservedEvents::new(window());
        let first = window().start + chrono::Duration::hours(9);
        observed.observe("evt-1", None);
        observed.observe("evt-1", Some(first));
        observed.observe("evt-1", Some(first + chrono::Duration::hours(1)));

        assert_eq!(observed.lookup("evt-1"), Some(Some(first)));
        assert_eq!(observed.lookup("evt-2"), None);
        assert!(observed.is_complete());
        observed.mark_incomplete();
        assert!(!observed.is_complete());
    }
}
