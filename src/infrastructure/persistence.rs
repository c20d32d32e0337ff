use crate::domain::models::{CalendarPreference, GoogleEvent, Job, ScheduleEvent, SyncWindow};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};

pub trait JobRepository: Send + Sync {
    fn get_job(&self, job_id: &str) -> Result<Option<Job>, InfraError>;
    fn save_job(&self, job: &Job) -> Result<(), InfraError>;
    /// Jobs with `scheduled_date` inside `window` and a remote source id.
    fn list_linked_jobs_in_window(&self, window: &SyncWindow) -> Result<Vec<Job>, InfraError>;
    /// Moves `scheduled_date`, setting `original_scheduled_date` to `previous`
    /// only when it has never been set.
    fn record_job_reschedule(
        &self,
        job_id: &str,
        previous: Option<DateTime<Utc>>,
        scheduled_date: DateTime<Utc>,
    ) -> Result<(), InfraError>;
    /// Returns whether the flag changed.
    fn set_job_cancelled(&self, job_id: &str, cancelled: bool) -> Result<bool, InfraError>;
}

pub trait ScheduleEventRepository: Send + Sync {
    fn get_schedule_event(&self, id: &str) -> Result<Option<ScheduleEvent>, InfraError>;
    fn find_schedule_event_by_remote_id(
        &self,
        remote_event_id: &str,
        calendar_id: &str,
    ) -> Result<Option<ScheduleEvent>, InfraError>;
    fn save_schedule_event(&self, event: &ScheduleEvent) -> Result<(), InfraError>;
    fn delete_schedule_event(&self, id: &str) -> Result<bool, InfraError>;
    fn list_schedule_events_for_job(&self, job_id: &str) -> Result<Vec<ScheduleEvent>, InfraError>;
    /// Writes the remote identity back after a push. Returns false when the row is gone.
    fn record_remote_link(
        &self,
        id: &str,
        remote_event_id: &str,
        calendar_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, InfraError>;
}

pub trait GoogleEventRepository: Send + Sync {
    fn get_google_event(&self, id: &str) -> Result<Option<GoogleEvent>, InfraError>;
    fn find_google_event(
        &self,
        remote_event_id: &str,
        calendar_id: &str,
    ) -> Result<Option<GoogleEvent>, InfraError>;
    /// Upserts on (remote id, calendar id). Conversion fields of an existing row are kept.
    fn save_google_event(&self, event: &GoogleEvent) -> Result<(), InfraError>;
    /// Marks the row converted if nobody has yet. Returns whether this call won.
    fn claim_conversion(&self, id: &str, job_id: &str) -> Result<bool, InfraError>;
    fn list_unconverted_google_events(
        &self,
        window: &SyncWindow,
    ) -> Result<Vec<GoogleEvent>, InfraError>;
}

pub trait CalendarPreferenceRepository: Send + Sync {
    fn list_preferences(&self) -> Result<Vec<CalendarPreference>, InfraError>;
    fn get_preference(&self, calendar_id: &str) -> Result<Option<CalendarPreference>, InfraError>;
    /// Inserts a row unless the calendar already has one. Returns whether it was inserted.
    fn insert_preference_if_absent(
        &self,
        preference: &CalendarPreference,
    ) -> Result<bool, InfraError>;
    /// Updates provider-owned fields only. `is_primary` never turns off.
    fn refresh_preference_metadata(
        &self,
        calendar_id: &str,
        display_name: &str,
        background_color: Option<&str>,
        is_primary: bool,
    ) -> Result<bool, InfraError>;
    fn set_preference_enabled(&self, calendar_id: &str, enabled: bool) -> Result<bool, InfraError>;
    fn set_preference_synced_at(
        &self,
        calendar_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, InfraError>;
}

pub trait PersistenceStore:
    JobRepository + ScheduleEventRepository + GoogleEventRepository + CalendarPreferenceRepository
{
}

impl<T> PersistenceStore for T where
    T: JobRepository
        + ScheduleEventRepository
        + GoogleEventRepository
        + CalendarPreferenceRepository
{
}
