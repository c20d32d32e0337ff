use crate::domain::models::{
    CalendarPreference, GoogleEvent, Job, JobStatus, ScheduleEvent, SyncWindow,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistence::{
    CalendarPreferenceRepository, GoogleEventRepository, JobRepository, ScheduleEventRepository,
};
use crate::infrastructure::storage::open_connection;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

const JOB_COLUMNS: &str = "id, name, address, status, scheduled_date, original_scheduled_date,
     source_google_event_id, is_cancelled";
const SCHEDULE_EVENT_COLUMNS: &str = "id, job_id, title, start_time, end_time, notes, color,
     google_calendar_event_id, google_calendar_id, last_synced_at";
const GOOGLE_EVENT_COLUMNS: &str = "id, google_event_id, google_calendar_id, title, description,
     location, start_time, end_time, color_id, is_converted, converted_to_job_id, last_synced_at";
const PREFERENCE_COLUMNS: &str =
    "calendar_id, display_name, background_color, is_enabled, is_primary, last_synced_at";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

// Millisecond precision with a fixed `Z` suffix keeps text ordering equal to time ordering.
fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_optional_time(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(format_time)
}

fn time_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
        })
}

fn optional_time_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(index)?;
    match raw {
        None => Ok(None),
        Some(_) => time_column(row, index).map(Some),
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status_raw: String = row.get(3)?;
    let status = JobStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown job status '{status_raw}'").into(),
        )
    })?;
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        status,
        scheduled_date: optional_time_column(row, 4)?,
        original_scheduled_date: optional_time_column(row, 5)?,
        source_google_event_id: row.get(6)?,
        is_cancelled: row.get(7)?,
    })
}

fn schedule_event_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleEvent> {
    Ok(ScheduleEvent {
        id: row.get(0)?,
        job_id: row.get(1)?,
        title: row.get(2)?,
        start_time: time_column(row, 3)?,
        end_time: time_column(row, 4)?,
        notes: row.get(5)?,
        color: row.get(6)?,
        google_calendar_event_id: row.get(7)?,
        google_calendar_id: row.get(8)?,
        last_synced_at: optional_time_column(row, 9)?,
    })
}

fn google_event_from_row(row: &Row<'_>) -> rusqlite::Result<GoogleEvent> {
    Ok(GoogleEvent {
        id: row.get(0)?,
        google_event_id: row.get(1)?,
        google_calendar_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        location: row.get(5)?,
        start_time: time_column(row, 6)?,
        end_time: time_column(row, 7)?,
        color_id: row.get(8)?,
        is_converted: row.get(9)?,
        converted_to_job_id: row.get(10)?,
        last_synced_at: time_column(row, 11)?,
    })
}

fn preference_from_row(row: &Row<'_>) -> rusqlite::Result<CalendarPreference> {
    Ok(CalendarPreference {
        calendar_id: row.get(0)?,
        display_name: row.get(1)?,
        background_color: row.get(2)?,
        is_enabled: row.get(3)?,
        is_primary: row.get(4)?,
        last_synced_at: optional_time_column(row, 5)?,
    })
}

impl JobRepository for SqliteStore {
    fn get_job(&self, job_id: &str) -> Result<Option<Job>, InfraError> {
        let connection = self.connect()?;
        let job = connection
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn save_job(&self, job: &Job) -> Result<(), InfraError> {
        job.validate().map_err(InfraError::InvalidConfig)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO jobs (id, name, address, status, scheduled_date, original_scheduled_date,
                               source_google_event_id, is_cancelled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               address = excluded.address,
               status = excluded.status,
               scheduled_date = excluded.scheduled_date,
               original_scheduled_date = excluded.original_scheduled_date,
               source_google_event_id = excluded.source_google_event_id,
               is_cancelled = excluded.is_cancelled",
            params![
                job.id,
                job.name,
                job.address,
                job.status.as_str(),
                format_optional_time(job.scheduled_date),
                format_optional_time(job.original_scheduled_date),
                job.source_google_event_id,
                job.is_cancelled,
            ],
        )?;
        Ok(())
    }

    fn list_linked_jobs_in_window(&self, window: &SyncWindow) -> Result<Vec<Job>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE source_google_event_id IS NOT NULL
               AND TRIM(source_google_event_id) <> ''
               AND scheduled_date >= ?1
               AND scheduled_date < ?2
             ORDER BY scheduled_date, id"
        ))?;
        let jobs = statement
            .query_map(
                params![format_time(window.start), format_time(window.end)],
                job_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn record_job_reschedule(
        &self,
        job_id: &str,
        previous: Option<DateTime<Utc>>,
        scheduled_date: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let updated = connection.execute(
            "UPDATE jobs
             SET original_scheduled_date = COALESCE(original_scheduled_date, ?2),
                 scheduled_date = ?3
             WHERE id = ?1",
            params![
                job_id,
                format_optional_time(previous),
                format_time(scheduled_date)
            ],
        )?;
        if updated == 0 {
            return Err(InfraError::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    fn set_job_cancelled(&self, job_id: &str, cancelled: bool) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let updated = connection.execute(
            "UPDATE jobs SET is_cancelled = ?2 WHERE id = ?1 AND is_cancelled <> ?2",
            params![job_id, cancelled],
        )?;
        Ok(updated > 0)
    }
}

impl ScheduleEventRepository for SqliteStore {
    fn get_schedule_event(&self, id: &str) -> Result<Option<ScheduleEvent>, InfraError> {
        let connection = self.connect()?;
        let event = connection
            .query_row(
                &format!("SELECT {SCHEDULE_EVENT_COLUMNS} FROM schedule_events WHERE id = ?1"),
                params![id],
                schedule_event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    fn find_schedule_event_by_remote_id(
        &self,
        remote_event_id: &str,
        calendar_id: &str,
    ) -> Result<Option<ScheduleEvent>, InfraError> {
        let connection = self.connect()?;
        let event = connection
            .query_row(
                &format!(
                    "SELECT {SCHEDULE_EVENT_COLUMNS} FROM schedule_events
                     WHERE google_calendar_event_id = ?1 AND google_calendar_id = ?2
                     ORDER BY id
                     LIMIT 1"
                ),
                params![remote_event_id, calendar_id],
                schedule_event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    fn save_schedule_event(&self, event: &ScheduleEvent) -> Result<(), InfraError> {
        event.validate().map_err(InfraError::InvalidConfig)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO schedule_events (id, job_id, title, start_time, end_time, notes, color,
                                          google_calendar_event_id, google_calendar_id, last_synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               job_id = excluded.job_id,
               title = excluded.title,
               start_time = excluded.start_time,
               end_time = excluded.end_time,
               notes = excluded.notes,
               color = excluded.color,
               google_calendar_event_id = excluded.google_calendar_event_id,
               google_calendar_id = excluded.google_calendar_id,
               last_synced_at = excluded.last_synced_at",
            params![
                event.id,
                event.job_id,
                event.title,
                format_time(event.start_time),
                format_time(event.end_time),
                event.notes,
                event.color,
                event.google_calendar_event_id,
                event.google_calendar_id,
                format_optional_time(event.last_synced_at),
            ],
        )?;
        Ok(())
    }

    fn delete_schedule_event(&self, id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let deleted = connection.execute("DELETE FROM schedule_events WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn list_schedule_events_for_job(&self, job_id: &str) -> Result<Vec<ScheduleEvent>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {SCHEDULE_EVENT_COLUMNS} FROM schedule_events
             WHERE job_id = ?1
             ORDER BY start_time, id"
        ))?;
        let events = statement
            .query_map(params![job_id], schedule_event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn record_remote_link(
        &self,
        id: &str,
        remote_event_id: &str,
        calendar_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let updated = connection.execute(
            "UPDATE schedule_events
             SET google_calendar_event_id = ?2,
                 google_calendar_id = ?3,
                 last_synced_at = ?4
             WHERE id = ?1",
            params![id, remote_event_id, calendar_id, format_time(synced_at)],
        )?;
        Ok(updated > 0)
    }
}

impl GoogleEventRepository for SqliteStore {
    fn get_google_event(&self, id: &str) -> Result<Option<GoogleEvent>, InfraError> {
        let connection = self.connect()?;
        let event = connection
            .query_row(
                &format!("SELECT {GOOGLE_EVENT_COLUMNS} FROM google_events WHERE id = ?1"),
                params![id],
                google_event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    fn find_google_event(
        &self,
        remote_event_id: &str,
        calendar_id: &str,
    ) -> Result<Option<GoogleEvent>, InfraError> {
        let connection = self.connect()?;
        let event = connection
            .query_row(
                &format!(
                    "SELECT {GOOGLE_EVENT_COLUMNS} FROM google_events
                     WHERE google_event_id = ?1 AND google_calendar_id = ?2"
                ),
                params![remote_event_id, calendar_id],
                google_event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    fn save_google_event(&self, event: &GoogleEvent) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO google_events (id, google_event_id, google_calendar_id, title, description,
                                        location, start_time, end_time, color_id, is_converted,
                                        converted_to_job_id, last_synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(google_event_id, google_calendar_id) DO UPDATE SET
               title = excluded.title,
               description = excluded.description,
               location = excluded.location,
               start_time = excluded.start_time,
               end_time = excluded.end_time,
               color_id = excluded.color_id,
               last_synced_at = excluded.last_synced_at",
            params![
                event.id,
                event.google_event_id,
                event.google_calendar_id,
                event.title,
                event.description,
                event.location,
                format_time(event.start_time),
                format_time(event.end_time),
                event.color_id,
                event.is_converted,
                event.converted_to_job_id,
                format_time(event.last_synced_at),
            ],
        )?;
        Ok(())
    }

    fn claim_conversion(&self, id: &str, job_id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let claimed = connection.execute(
            "UPDATE google_events
             SET is_converted = 1, converted_to_job_id = ?2
             WHERE id = ?1 AND is_converted = 0",
            params![id, job_id],
        )?;
        Ok(claimed == 1)
    }

    fn list_unconverted_google_events(
        &self,
        window: &SyncWindow,
    ) -> Result<Vec<GoogleEvent>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {GOOGLE_EVENT_COLUMNS} FROM google_events
             WHERE is_converted = 0 AND start_time >= ?1 AND start_time < ?2
             ORDER BY start_time, id"
        ))?;
        let events = statement
            .query_map(
                params![format_time(window.start), format_time(window.end)],
                google_event_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

impl CalendarPreferenceRepository for SqliteStore {
    fn list_preferences(&self) -> Result<Vec<CalendarPreference>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {PREFERENCE_COLUMNS} FROM calendar_preferences
             ORDER BY is_primary DESC, calendar_id"
        ))?;
        let preferences = statement
            .query_map([], preference_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(preferences)
    }

    fn get_preference(&self, calendar_id: &str) -> Result<Option<CalendarPreference>, InfraError> {
        let connection = self.connect()?;
        let preference = connection
            .query_row(
                &format!(
                    "SELECT {PREFERENCE_COLUMNS} FROM calendar_preferences WHERE calendar_id = ?1"
                ),
                params![calendar_id],
                preference_from_row,
            )
            .optional()?;
        Ok(preference)
    }

    fn insert_preference_if_absent(
        &self,
        preference: &CalendarPreference,
    ) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let inserted = connection.execute(
            "INSERT INTO calendar_preferences (calendar_id, display_name, background_color,
                                               is_enabled, is_primary, last_synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(calendar_id) DO NOTHING",
            params![
                preference.calendar_id,
                preference.display_name,
                preference.background_color,
                preference.is_enabled,
                preference.is_primary,
                format_optional_time(preference.last_synced_at),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn refresh_preference_metadata(
        &self,
        calendar_id: &str,
        display_name: &str,
        background_color: Option<&str>,
        is_primary: bool,
    ) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let updated = connection.execute(
            "UPDATE calendar_preferences
             SET display_name = ?2,
                 background_color = ?3,
                 is_primary = MAX(is_primary, ?4)
             WHERE calendar_id = ?1",
            params![calendar_id, display_name, background_color, is_primary],
        )?;
        Ok(updated > 0)
    }

    fn set_preference_enabled(&self, calendar_id: &str, enabled: bool) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let updated = connection.execute(
            "UPDATE calendar_preferences SET is_enabled = ?2 WHERE calendar_id = ?1",
            params![calendar_id, enabled],
        )?;
        Ok(updated > 0)
    }

    fn set_preference_synced_at(
        &self,
        calendar_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let updated = connection.execute(
            "UPDATE calendar_preferences SET last_synced_at = ?2 WHERE calendar_id = ?1",
            params![calendar_id, format_time(synced_at)],
        )?;
        Ok(updated > 0)
    }
}
