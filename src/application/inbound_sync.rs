use crate::domain::models::{
    google_event_row_id, schedule_event_id_for_remote, GoogleEvent, ScheduleEvent,
};
use crate::domain::sync_result::{IssueKind, ObservedEvents, SyncIssue, SyncResult};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    parse_remote_event, EventFields, GoogleCalendarEvent, ParsedEvent,
};
use crate::infrastructure::persistence::{
    GoogleEventRepository, JobRepository, ScheduleEventRepository,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

enum Applied {
    Created,
    Updated,
    Orphaned,
}

/// Applies one calendar's fetched events to the local store.
///
/// Every event ends up counted as created, updated or skipped. Nothing here
/// aborts the batch; store failures are counted against the single event.
pub struct InboundReconciler<'a, S>
where
    S: JobRepository + ScheduleEventRepository + GoogleEventRepository + ?Sized,
{
    store: &'a S,
    timezone: Tz,
    synced_at: DateTime<Utc>,
}

impl<'a, S> InboundReconciler<'a, S>
where
    S: JobRepository + ScheduleEventRepository + GoogleEventRepository + ?Sized,
{
    pub fn new(store: &'a S, timezone: Tz, synced_at: DateTime<Utc>) -> Self {
        Self {
            store,
            timezone,
            synced_at,
        }
    }

    pub fn reconcile_calendar(
        &self,
        calendar_id: &str,
        events: &[GoogleCalendarEvent],
        result: &mut SyncResult,
        observed: &mut ObservedEvents,
    ) {
        for event in events {
            let Some(remote_id) = event.remote_id() else {
                warn!(calendar_id, "skipping remote event without id");
                result.record_skipped(
                    SyncIssue::new(IssueKind::Unparseable, "remote event has no id")
                        .calendar(calendar_id),
                );
                continue;
            };

            // A cancelled instance is the same as an absent one.
            if event.is_cancelled() {
                debug!(calendar_id, event_id = remote_id, "ignoring cancelled remote event");
                result.record_skipped_cancelled();
                continue;
            }

            let Some(parsed) = parse_remote_event(event, calendar_id, self.timezone) else {
                observed.observe(remote_id, None);
                warn!(
                    calendar_id,
                    event_id = remote_id,
                    "skipping remote event without usable times"
                );
                result.record_skipped(
                    SyncIssue::new(IssueKind::Unparseable, "no usable start/end time")
                        .calendar(calendar_id)
                        .event(remote_id),
                );
                continue;
            };
            observed.observe(remote_id, Some(parsed.fields().start_time));

            let kind = parsed.kind();
            let outcome = match &parsed {
                ParsedEvent::Linked {
                    schedule_event_id,
                    job_id,
                    fields,
                } => self.apply_linked(schedule_event_id.as_deref(), job_id, fields),
                ParsedEvent::Unlinked(fields) => self.apply_unlinked(fields),
            };

            match outcome {
                Ok(Applied::Created) => result.record_created(kind),
                Ok(Applied::Updated) => result.record_updated(kind),
                Ok(Applied::Orphaned) => {
                    let job_id = match &parsed {
                        ParsedEvent::Linked { job_id, .. } => job_id.as_str(),
                        ParsedEvent::Unlinked(_) => "",
                    };
                    warn!(
                        calendar_id,
                        event_id = remote_id,
                        job_id,
                        "remote event references unknown job"
                    );
                    result.record_skipped(
                        SyncIssue::new(IssueKind::OrphanedJob, "referenced job does not exist")
                            .calendar(calendar_id)
                            .event(remote_id)
                            .job(job_id),
                    );
                }
                Err(error) => {
                    warn!(
                        calendar_id,
                        event_id = remote_id,
                        %error,
                        "failed to store remote event"
                    );
                    let mut issue = SyncIssue::new(IssueKind::PersistenceFailure, error.to_string())
                        .calendar(calendar_id)
                        .event(remote_id);
                    if let ParsedEvent::Linked { job_id, .. } = &parsed {
                        issue = issue.job(job_id);
                    }
                    result.record_skipped(issue);
                }
            }
        }
    }

    fn apply_linked(
        &self,
        schedule_event_id: Option<&str>,
        job_id: &str,
        fields: &EventFields,
    ) -> Result<Applied, InfraError> {
        let known = match schedule_event_id {
            Some(id) => self.store.get_schedule_event(id)?,
            None => None,
        };
        let existing = match known {
            Some(event) => Some(event),
            None => self.store.find_schedule_event_by_remote_id(
                &fields.google_calendar_event_id,
                &fields.google_calendar_id,
            )?,
        };

        if let Some(mut event) = existing {
            self.copy_remote_fields(&mut event, fields);
            self.store.save_schedule_event(&event)?;
            debug!(
                schedule_event_id = %event.id,
                job_id = %event.job_id,
                "updated schedule event from remote"
            );
            return Ok(Applied::Updated);
        }

        if self.store.get_job(job_id)?.is_none() {
            return Ok(Applied::Orphaned);
        }

        let mut event = ScheduleEvent::new(
            schedule_event_id_for_remote(
                &fields.google_calendar_id,
                &fields.google_calendar_event_id,
            ),
            job_id,
            fields.title.clone(),
            fields.start_time,
            fields.end_time,
        );
        self.copy_remote_fields(&mut event, fields);
        self.store.save_schedule_event(&event)?;
        debug!(schedule_event_id = %event.id, job_id, "created schedule event from remote");
        Ok(Applied::Created)
    }

    fn copy_remote_fields(&self, event: &mut ScheduleEvent, fields: &EventFields) {
        event.title = fields.title.clone();
        event.start_time = fields.start_time;
        event.end_time = fields.end_time;
        event.notes = fields.notes.clone();
        event.color = fields.color.clone();
        event.google_calendar_event_id = Some(fields.google_calendar_event_id.clone());
        event.google_calendar_id = fields.google_calendar_id.clone();
        event.last_synced_at = Some(self.synced_at);
    }

    fn apply_unlinked(&self, fields: &EventFields) -> Result<Applied, InfraError> {
        let existing = self
            .store
            .find_google_event(&fields.google_calendar_event_id, &fields.google_calendar_id)?;
        let applied = if existing.is_some() {
            Applied::Updated
        } else {
            Applied::Created
        };

        let row = match existing {
            Some(mut row) => {
                row.title = fields.title.clone();
                row.description = fields.notes.clone();
                row.location = fields.location.clone();
                row.start_time = fields.start_time;
                row.end_time = fields.end_time;
                row.color_id = fields.color_id.clone();
                row.last_synced_at = self.synced_at;
                row
            }
            None => GoogleEvent {
                id: google_event_row_id(
                    &fields.google_calendar_id,
                    &fields.google_calendar_event_id,
                ),
                google_event_id: fields.google_calendar_event_id.clone(),
                google_calendar_id: fields.google_calendar_id.clone(),
                title: fields.title.clone(),
                description: fields.notes.clone(),
                location: fields.location.clone(),
                start_time: fields.start_time,
                end_time: fields.end_time,
                color_id: fields.color_id.clone(),
                is_converted: false,
                converted_to_job_id: None,
                last_synced_at: self.synced_at,
            },
        };
        self.store.save_google_event(&row)?;
        Ok(applied)
    }
}
