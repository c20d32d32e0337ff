use crate::domain::models::{Job, JobStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    CalendarEventDateTime, CalendarEventExtendedProperties, GoogleCalendarEvent, KEY_JOB_ID,
};
use crate::infrastructure::google_calendar_client::{
    GoogleCalendarClient, GoogleCalendarSummary, ListEventsRequest,
};
use crate::infrastructure::sqlite_store::SqliteStore;
use crate::infrastructure::storage::initialize_database;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
pub enum FakeFailure {
    Network,
    Auth,
    NotFound,
}

impl FakeFailure {
    fn into_error(self, context: &str) -> InfraError {
        match self {
            Self::Network => InfraError::Provider(format!("network error while {context}")),
            Self::Auth => InfraError::Authentication(format!("http 401 while {context}")),
            Self::NotFound => InfraError::NotFound(format!("http 404 while {context}")),
        }
    }
}

/// Scriptable stand-in for the calendar provider, holding events per calendar.
#[derive(Debug, Default)]
pub struct FakeGoogleCalendarClient {
    calendars: Mutex<Vec<GoogleCalendarSummary>>,
    events: Mutex<HashMap<String, Vec<GoogleCalendarEvent>>>,
    list_failures: Mutex<HashMap<String, VecDeque<FakeFailure>>>,
    write_failure: Mutex<Option<FakeFailure>>,
    next_remote_id: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl FakeGoogleCalendarClient {
    pub fn with_events(calendar_id: &str, events: Vec<GoogleCalendarEvent>) -> Self {
        let client = Self::default();
        client.set_events(calendar_id, events);
        client
    }

    pub fn set_events(&self, calendar_id: &str, events: Vec<GoogleCalendarEvent>) {
        self.events
            .lock()
            .expect("events lock poisoned")
            .insert(calendar_id.to_string(), events);
    }

    pub fn events(&self, calendar_id: &str) -> Vec<GoogleCalendarEvent> {
        self.events
            .lock()
            .expect("events lock poisoned")
            .get(calendar_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_calendars(&self, calendars: Vec<GoogleCalendarSummary>) {
        *self.calendars.lock().expect("calendars lock poisoned") = calendars;
    }

    /// Queues failures returned by the next list calls for `calendar_id`.
    pub fn fail_list(&self, calendar_id: &str, failures: Vec<FakeFailure>) {
        self.list_failures
            .lock()
            .expect("failures lock poisoned")
            .entry(calendar_id.to_string())
            .or_default()
            .extend(failures);
    }

    pub fn fail_writes(&self, failure: Option<FakeFailure>) {
        *self.write_failure.lock().expect("write failure lock poisoned") = failure;
    }

    fn check_write(&self, context: &str) -> Result<(), InfraError> {
        match *self.write_failure.lock().expect("write failure lock poisoned") {
            Some(failure) => Err(failure.into_error(context)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GoogleCalendarClient for FakeGoogleCalendarClient {
    async fn list_calendars(&self) -> Result<Vec<GoogleCalendarSummary>, InfraError> {
        Ok(self.calendars.lock().expect("calendars lock poisoned").clone())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        _request: ListEventsRequest,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .list_failures
            .lock()
            .expect("failures lock poisoned")
            .get_mut(calendar_id)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = failure {
            return Err(failure.into_error("listing calendar events"));
        }
        Ok(self.events(calendar_id))
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_write("creating event")?;
        let remote_id = format!(
            "remote-{}",
            self.next_remote_id.fetch_add(1, Ordering::SeqCst) + 1
        );
        let mut stored = event.clone();
        stored.id = Some(remote_id.clone());
        self.events
            .lock()
            .expect("events lock poisoned")
            .entry(calendar_id.to_string())
            .or_default()
            .push(stored);
        Ok(remote_id)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<(), InfraError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_write("updating event")?;
        let mut events = self.events.lock().expect("events lock poisoned");
        let Some(existing) = events.get_mut(calendar_id).and_then(|events| {
            events
                .iter_mut()
                .find(|stored| stored.remote_id() == Some(event_id))
        }) else {
            return Err(FakeFailure::NotFound.into_error("updating event"));
        };
        *existing = event.clone();
        existing.id = Some(event_id.to_string());
        Ok(())
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), InfraError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_write("deleting event")?;
        let mut events = self.events.lock().expect("events lock poisoned");
        let Some(stored) = events.get_mut(calendar_id) else {
            return Err(FakeFailure::NotFound.into_error("deleting event"));
        };
        let before = stored.len();
        stored.retain(|existing| existing.remote_id() != Some(event_id));
        if stored.len() == before {
            return Err(FakeFailure::NotFound.into_error("deleting event"));
        }
        Ok(())
    }
}

pub fn fixed_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid datetime")
        .with_timezone(&Utc)
}

pub fn timed_event(id: &str, summary: &str, start: &str, end: &str) -> GoogleCalendarEvent {
    GoogleCalendarEvent {
        id: Some(id.to_string()),
        summary: Some(summary.to_string()),
        status: Some("confirmed".to_string()),
        start: CalendarEventDateTime {
            date_time: Some(start.to_string()),
            ..CalendarEventDateTime::default()
        },
        end: CalendarEventDateTime {
            date_time: Some(end.to_string()),
            ..CalendarEventDateTime::default()
        },
        ..GoogleCalendarEvent::default()
    }
}

pub fn linked_event(id: &str, job_id: &str, start: &str, end: &str) -> GoogleCalendarEvent {
    let mut event = timed_event(id, "Inspection", start, end);
    event.extended_properties = Some(CalendarEventExtendedProperties {
        private: HashMap::from([(KEY_JOB_ID.to_string(), job_id.to_string())]),
    });
    event
}

pub fn sample_job(id: &str, remote_id: Option<&str>, scheduled: &str) -> Job {
    let mut job = Job::new(id, format!("Inspection {id}"));
    job.status = JobStatus::Scheduled;
    job.scheduled_date = Some(fixed_time(scheduled));
    job.source_google_event_id = remote_id.map(ToOwned::to_owned);
    job
}

static NEXT_TEMP_ID: AtomicUsize = AtomicUsize::new(0);

/// Initialized SQLite database in a scratch directory removed on drop.
pub struct TempDatabase {
    dir: PathBuf,
    pub store: Arc<SqliteStore>,
}

impl TempDatabase {
    pub fn new() -> Self {
        let sequence = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "fieldsync-service-tests-{}-{}",
            std::process::id(),
            sequence
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        let db_path = dir.join("fieldsync.sqlite");
        initialize_database(&db_path).expect("initialize database");
        Self {
            store: Arc::new(SqliteStore::new(&db_path)),
            dir,
        }
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}
