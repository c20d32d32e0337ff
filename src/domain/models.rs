use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Calendar id used when no preference has ever been recorded.
pub const PRIMARY_CALENDAR_ID: &str = "primary";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Local id of a ScheduleEvent materialised from a remote event. Derived from the
/// remote identity so that two passes racing on the same event write the same row.
pub fn schedule_event_id_for_remote(calendar_id: &str, remote_event_id: &str) -> String {
    format!("sev:{calendar_id}:{remote_event_id}")
}

/// Local row id of an unlinked remote event, keyed the same way as its uniqueness.
pub fn google_event_row_id(calendar_id: &str, remote_event_id: &str) -> String {
    format!("gev:{calendar_id}:{remote_event_id}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scheduled,
    InProgress,
    Review,
    Done,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "scheduled" => Some(Self::Scheduled),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "done" | "completed" => Some(Self::Done),
            _ => None,
        }
    }

    /// Inspection work has been performed on site.
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub status: JobStatus,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub original_scheduled_date: Option<DateTime<Utc>>,
    pub source_google_event_id: Option<String>,
    pub is_cancelled: bool,
}

impl Job {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: None,
            status: JobStatus::Pending,
            scheduled_date: None,
            original_scheduled_date: None,
            source_google_event_id: None,
            is_cancelled: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "job.id")?;
        validate_non_empty(&self.name, "job.name")?;
        if let Some(source) = self.source_google_event_id.as_deref() {
            validate_non_empty(source, "job.source_google_event_id")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleEvent {
    pub id: String,
    pub job_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub notes: Option<String>,
    pub color: Option<String>,
    pub google_calendar_event_id: Option<String>,
    pub google_calendar_id: String,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl ScheduleEvent {
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            title: title.into(),
            start_time,
            end_time,
            notes: None,
            color: None,
            google_calendar_event_id: None,
            google_calendar_id: PRIMARY_CALENDAR_ID.to_string(),
            last_synced_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "schedule_event.id")?;
        validate_non_empty(&self.job_id, "schedule_event.job_id")?;
        validate_non_empty(&self.google_calendar_id, "schedule_event.google_calendar_id")?;
        if self.end_time < self.start_time {
            return Err("schedule_event.end_time must not be before start_time".to_string());
        }
        Ok(())
    }

    pub fn remote_event_id(&self) -> Option<&str> {
        self.google_calendar_event_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoogleEvent {
    pub id: String,
    pub google_event_id: String,
    pub google_calendar_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub color_id: Option<String>,
    pub is_converted: bool,
    pub converted_to_job_id: Option<String>,
    pub last_synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarPreference {
    pub calendar_id: String,
    pub display_name: String,
    pub background_color: Option<String>,
    pub is_enabled: bool,
    pub is_primary: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CalendarPreference {
    /// Preference row for a calendar seen for the first time. Sync is opt-out.
    pub fn discovered(calendar_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let calendar_id = calendar_id.into();
        Self {
            is_primary: calendar_id == PRIMARY_CALENDAR_ID,
            calendar_id,
            display_name: display_name.into(),
            background_color: None,
            is_enabled: true,
            last_synced_at: None,
        }
    }
}

/// Half-open time range `[start, end)` a sync pass covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, String> {
        if end <= start {
            return Err("sync window end must be after start".to_string());
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

impl std::fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn job_status_parses_aliases() {
        assert_eq!(JobStatus::parse("Done"), Some(JobStatus::Done));
        assert_eq!(JobStatus::parse("completed"), Some(JobStatus::Done));
        assert_eq!(JobStatus::parse("in-progress"), Some(JobStatus::InProgress));
        assert_eq!(JobStatus::parse("archived"), None);
        assert!(JobStatus::Done.is_completed());
        assert!(!JobStatus::Review.is_completed());
    }

    #[test]
    fn sync_window_rejects_empty_range() {
        let at = fixed_time("2024-05-01T00:00:00Z");
        assert!(SyncWindow::new(at, at).is_err());
        let window = SyncWindow::new(at, at + chrono::Duration::days(1)).expect("window");
        assert!(window.contains(at));
        assert!(!window.contains(window.end));
    }

    #[test]
    fn discovered_calendar_defaults_to_enabled() {
        let preference = CalendarPreference::discovered("crew@example.com", "Crew");
        assert!(preference.is_enabled);
        assert!(!preference.is_primary);
        assert!(CalendarPreference::discovered(PRIMARY_CALENDAR_ID, "Me").is_primary);
    }

    #[test]
    fn schedule_event_validation_rejects_inverted_times() {
        let start = fixed_time("2024-05-01T09:00:00Z");
        let mut event = ScheduleEvent::new("sev-1", "job-1", "Inspection", start, start);
        assert!(event.validate().is_ok());
        event.end_time = start - chrono::Duration::minutes(5);
        assert!(event.validate().is_err());
    }
}
