use crate::domain::models::{CalendarPreference, GoogleEvent, Job, ScheduleEvent, SyncWindow};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistence::{
    CalendarPreferenceRepository, GoogleEventRepository, JobRepository, ScheduleEventRepository,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Process-local store with the same upsert semantics as the SQLite store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    jobs: Mutex<HashMap<String, Job>>,
    schedule_events: Mutex<HashMap<String, ScheduleEvent>>,
    google_events: Mutex<HashMap<String, GoogleEvent>>,
    preferences: Mutex<HashMap<String, CalendarPreference>>,
    failing_writes: Mutex<HashSet<String>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, InfraError> {
    mutex
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("{name} lock poisoned: {error}")))
}

impl InMemoryStore {
    /// Makes every write keyed by `id` fail, for exercising per-item failure paths.
    pub fn fail_writes_for(&self, id: &str) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            failing.insert(id.to_string());
        }
    }

    fn check_write(&self, id: &str) -> Result<(), InfraError> {
        let failing = lock(&self.failing_writes, "failing writes")?;
        if failing.contains(id) {
            return Err(InfraError::Io(std::io::Error::other(format!(
                "write rejected for {id}"
            ))));
        }
        Ok(())
    }

    fn update_preference(
        &self,
        calendar_id: &str,
        apply: impl FnOnce(&mut CalendarPreference),
    ) -> Result<bool, InfraError> {
        self.check_write(calendar_id)?;
        match lock(&self.preferences, "calendar preferences")?.get_mut(calendar_id) {
            Some(preference) => {
                apply(preference);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl JobRepository for InMemoryStore {
    fn get_job(&self, job_id: &str) -> Result<Option<Job>, InfraError> {
        Ok(lock(&self.jobs, "jobs")?.get(job_id).cloned())
    }

    fn save_job(&self, job: &Job) -> Result<(), InfraError> {
        job.validate().map_err(InfraError::InvalidConfig)?;
        self.check_write(&job.id)?;
        lock(&self.jobs, "jobs")?.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn list_linked_jobs_in_window(&self, window: &SyncWindow) -> Result<Vec<Job>, InfraError> {
        let jobs = lock(&self.jobs, "jobs")?;
        let mut linked: Vec<Job> = jobs
            .values()
            .filter(|job| {
                job.source_google_event_id
                    .as_deref()
                    .is_some_and(|source| !source.trim().is_empty())
            })
            .filter(|job| job.scheduled_date.is_some_and(|at| window.contains(at)))
            .cloned()
            .collect();
        linked.sort_by(|left, right| {
            left.scheduled_date
                .cmp(&right.scheduled_date)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(linked)
    }

    fn record_job_reschedule(
        &self,
        job_id: &str,
        previous: Option<DateTime<Utc>>,
        scheduled_date: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        self.check_write(job_id)?;
        let mut jobs = lock(&self.jobs, "jobs")?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| InfraError::NotFound(format!("job {job_id}")))?;
        if job.original_scheduled_date.is_none() {
            job.original_scheduled_date = previous;
        }
        job.scheduled_date = Some(scheduled_date);
        Ok(())
    }

    fn set_job_cancelled(&self, job_id: &str, cancelled: bool) -> Result<bool, InfraError> {
        self.check_write(job_id)?;
        let mut jobs = lock(&self.jobs, "jobs")?;
        match jobs.get_mut(job_id) {
            Some(job) if job.is_cancelled != cancelled => {
                job.is_cancelled = cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl ScheduleEventRepository for InMemoryStore {
    fn get_schedule_event(&self, id: &str) -> Result<Option<ScheduleEvent>, InfraError> {
        Ok(lock(&self.schedule_events, "schedule events")?.get(id).cloned())
    }

    fn find_schedule_event_by_remote_id(
        &self,
        remote_event_id: &str,
        calendar_id: &str,
    ) -> Result<Option<ScheduleEvent>, InfraError> {
        let events = lock(&self.schedule_events, "schedule events")?;
        Ok(events
            .values()
            .filter(|event| {
                event.remote_event_id() == Some(remote_event_id)
                    && event.google_calendar_id == calendar_id
            })
            .min_by(|left, right| left.id.cmp(&right.id))
            .cloned())
    }

    fn save_schedule_event(&self, event: &ScheduleEvent) -> Result<(), InfraError> {
        event.validate().map_err(InfraError::InvalidConfig)?;
        self.check_write(&event.id)?;
        if !lock(&self.jobs, "jobs")?.contains_key(&event.job_id) {
            return Err(InfraError::NotFound(format!(
                "job {} for schedule event {}",
                event.job_id, event.id
            )));
        }
        lock(&self.schedule_events, "schedule events")?.insert(event.id.clone(), event.clone());
        Ok(())
    }

    fn delete_schedule_event(&self, id: &str) -> Result<bool, InfraError> {
        self.check_write(id)?;
        Ok(lock(&self.schedule_events, "schedule events")?
            .remove(id)
            .is_some())
    }

    fn list_schedule_events_for_job(&self, job_id: &str) -> Result<Vec<ScheduleEvent>, InfraError> {
        let events = lock(&self.schedule_events, "schedule events")?;
        let mut owned: Vec<ScheduleEvent> = events
            .values()
            .filter(|event| event.job_id == job_id)
            .cloned()
            .collect();
        owned.sort_by(|left, right| {
            left.start_time
                .cmp(&right.start_time)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(owned)
    }

    fn record_remote_link(
        &self,
        id: &str,
        remote_event_id: &str,
        calendar_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        self.check_write(id)?;
        let mut events = lock(&self.schedule_events, "schedule events")?;
        let Some(event) = events.get_mut(id) else {
            return Ok(false);
        };
        event.google_calendar_event_id = Some(remote_event_id.to_string());
        event.google_calendar_id = calendar_id.to_string();
        event.last_synced_at = Some(synced_at);
        Ok(true)
    }
}

impl GoogleEventRepository for InMemoryStore {
    fn get_google_event(&self, id: &str) -> Result<Option<GoogleEvent>, InfraError> {
        Ok(lock(&self.google_events, "google events")?.get(id).cloned())
    }

    fn find_google_event(
        &self,
        remote_event_id: &str,
        calendar_id: &str,
    ) -> Result<Option<GoogleEvent>, InfraError> {
        let events = lock(&self.google_events, "google events")?;
        Ok(events
            .values()
            .find(|event| {
                event.google_event_id == remote_event_id && event.google_calendar_id == calendar_id
            })
            .cloned())
    }

    fn save_google_event(&self, event: &GoogleEvent) -> Result<(), InfraError> {
        self.check_write(&event.id)?;
        let mut events = lock(&self.google_events, "google events")?;
        let existing_key = events
            .iter()
            .find(|(_, stored)| {
                stored.google_event_id == event.google_event_id
                    && stored.google_calendar_id == event.google_calendar_id
            })
            .map(|(key, _)| key.clone());

        match existing_key.and_then(|key| events.get_mut(&key)) {
            Some(stored) => {
                stored.title = event.title.clone();
                stored.description = event.description.clone();
                stored.location = event.location.clone();
                stored.start_time = event.start_time;
                stored.end_time = event.end_time;
                stored.color_id = event.color_id.clone();
                stored.last_synced_at = event.last_synced_at;
            }
            None => {
                events.insert(event.id.clone(), event.clone());
            }
        }
        Ok(())
    }

    fn claim_conversion(&self, id: &str, job_id: &str) -> Result<bool, InfraError> {
        self.check_write(id)?;
        let mut events = lock(&self.google_events, "google events")?;
        match events.get_mut(id) {
            Some(event) if !event.is_converted => {
                event.is_converted = true;
                event.converted_to_job_id = Some(job_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_unconverted_google_events(
        &self,
        window: &SyncWindow,
    ) -> Result<Vec<GoogleEvent>, InfraError> {
        let events = lock(&self.google_events, "google events")?;
        let mut unconverted: Vec<GoogleEvent> = events
            .values()
            .filter(|event| !event.is_converted && window.contains(event.start_time))
            .cloned()
            .collect();
        unconverted.sort_by(|left, right| {
            left.start_time
                .cmp(&right.start_time)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(unconverted)
    }
}

impl CalendarPreferenceRepository for InMemoryStore {
    fn list_preferences(&self) -> Result<Vec<CalendarPreference>, InfraError> {
        let preferences = lock(&self.preferences, "calendar preferences")?;
        let mut listed: Vec<CalendarPreference> = preferences.values().cloned().collect();
        listed.sort_by(|left, right| {
            right
                .is_primary
                .cmp(&left.is_primary)
                .then_with(|| left.calendar_id.cmp(&right.calendar_id))
        });
        Ok(listed)
    }

    fn get_preference(&self, calendar_id: &str) -> Result<Option<CalendarPreference>, InfraError> {
        Ok(lock(&self.preferences, "calendar preferences")?
            .get(calendar_id)
            .cloned())
    }

    fn insert_preference_if_absent(
        &self,
        preference: &CalendarPreference,
    ) -> Result<bool, InfraError> {
        self.check_write(&preference.calendar_id)?;
        let mut preferences = lock(&self.preferences, "calendar preferences")?;
        if preferences.contains_key(&preference.calendar_id) {
            return Ok(false);
        }
        preferences.insert(preference.calendar_id.clone(), preference.clone());
        Ok(true)
    }

    fn refresh_preference_metadata(
        &self,
        calendar_id: &str,
        display_name: &str,
        background_color: Option<&str>,
        is_primary: bool,
    ) -> Result<bool, InfraError> {
        self.update_preference(calendar_id, |preference| {
            preference.display_name = display_name.to_string();
            preference.background_color = background_color.map(ToOwned::to_owned);
            preference.is_primary = preference.is_primary || is_primary;
        })
    }

    fn set_preference_enabled(&self, calendar_id: &str, enabled: bool) -> Result<bool, InfraError> {
        self.update_preference(calendar_id, |preference| preference.is_enabled = enabled)
    }

    fn set_preference_synced_at(
        &self,
        calendar_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        self.update_preference(calendar_id, |preference| {
            preference.last_synced_at = Some(synced_at)
        })
    }
}
