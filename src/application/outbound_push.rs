use crate::domain::models::{Job, ScheduleEvent};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::encode_schedule_event;
use crate::infrastructure::google_calendar_client::GoogleCalendarClient;
use crate::infrastructure::persistence::{JobRepository, ScheduleEventRepository};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Mirrors local schedule events to the provider and records the remote id
/// on the local row so the next inbound pass updates instead of duplicating.
pub struct OutboundPusher<'a, C, S>
where
    C: GoogleCalendarClient + ?Sized,
    S: JobRepository + ScheduleEventRepository + ?Sized,
{
    client: &'a C,
    store: &'a S,
    pushed_at: DateTime<Utc>,
}

impl<'a, C, S> OutboundPusher<'a, C, S>
where
    C: GoogleCalendarClient + ?Sized,
    S: JobRepository + ScheduleEventRepository + ?Sized,
{
    pub fn new(client: &'a C, store: &'a S, pushed_at: DateTime<Utc>) -> Self {
        Self {
            client,
            store,
            pushed_at,
        }
    }

    /// Creates or updates the remote copy of `local` on `calendar_id`.
    ///
    /// Returns `None` without calling the provider when the local event cannot
    /// be represented remotely.
    pub async fn push_event(
        &self,
        local: &ScheduleEvent,
        job: &Job,
        calendar_id: &str,
    ) -> Result<Option<String>, InfraError> {
        if let Err(reason) = local.validate() {
            warn!(schedule_event_id = %local.id, %reason, "schedule event not pushable");
            return Ok(None);
        }
        let payload = encode_schedule_event(local, job);

        let remote_id = match local.remote_event_id() {
            Some(remote_id) if local.google_calendar_id == calendar_id => {
                match self.client.update_event(calendar_id, remote_id, &payload).await {
                    Ok(()) => {
                        debug!(
                            schedule_event_id = %local.id,
                            event_id = remote_id,
                            "updated remote event"
                        );
                        remote_id.to_string()
                    }
                    Err(error) if error.is_not_found() => {
                        info!(
                            schedule_event_id = %local.id,
                            event_id = remote_id,
                            "remote event vanished; recreating"
                        );
                        self.client.create_event(calendar_id, &payload).await?
                    }
                    Err(error) => return Err(error),
                }
            }
            Some(previous_remote_id) => {
                let created = self.client.create_event(calendar_id, &payload).await?;
                let previous_calendar = local.google_calendar_id.as_str();
                if let Err(error) = self
                    .delete_remote_event(previous_calendar, previous_remote_id)
                    .await
                {
                    warn!(
                        schedule_event_id = %local.id,
                        calendar_id = previous_calendar,
                        event_id = previous_remote_id,
                        %error,
                        "failed to remove event from previous calendar"
                    );
                }
                created
            }
            None => self.client.create_event(calendar_id, &payload).await?,
        };

        if !self
            .store
            .record_remote_link(&local.id, &remote_id, calendar_id, self.pushed_at)?
        {
            warn!(
                schedule_event_id = %local.id,
                event_id = %remote_id,
                "schedule event removed before its remote link was recorded"
            );
        }
        self.link_job_source(&job.id, &remote_id, local.start_time)?;

        info!(
            schedule_event_id = %local.id,
            calendar_id,
            event_id = %remote_id,
            "pushed schedule event"
        );
        Ok(Some(remote_id))
    }

    /// Deletes a remote event. An event that is already gone counts as deleted.
    pub async fn delete_remote_event(
        &self,
        calendar_id: &str,
        remote_id: &str,
    ) -> Result<(), InfraError> {
        match self.client.delete_event(calendar_id, remote_id).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_not_found() => {
                debug!(calendar_id, event_id = remote_id, "remote event already deleted");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    // Jobs created on the platform get their remote source on first push.
    fn link_job_source(
        &self,
        job_id: &str,
        remote_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let Some(mut job) = self.store.get_job(job_id)? else {
            return Ok(());
        };
        if job.source_google_event_id.is_some() {
            return Ok(());
        }
        job.source_google_event_id = Some(remote_id.to_string());
        if job.scheduled_date.is_none() {
            job.scheduled_date = Some(start_time);
        }
        self.store.save_job(&job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{
        fixed_time, sample_job, FakeFailure, FakeGoogleCalendarClient,
    };
    use crate::infrastructure::memory_store::InMemoryStore;
    use std::sync::atomic::Ordering;

    fn seeded_store() -> (InMemoryStore, Job, ScheduleEvent) {
        let store = InMemoryStore::default();
        let job = sample_job("J1", None, "2024-05-01T09:00:00Z");
        store.save_job(&job).expect("save job");
        let event = ScheduleEvent::new(
            "sev-1",
            "J1",
            "Final inspection",
            fixed_time("2024-05-01T09:00:00Z"),
            fixed_time("2024-05-01T10:00:00Z"),
        );
        store.save_schedule_event(&event).expect("save event");
        (store, job, event)
    }

    #[tokio::test]
    async fn first_push_creates_and_links() {
        let (store, job, event) = seeded_store();
        let client = FakeGoogleCalendarClient::default();
        let pusher = OutboundPusher::new(&client, &store, fixed_time("2024-05-01T08:00:00Z"));

        let remote_id = pusher
            .push_event(&event, &job, "primary")
            .await
            .expect("push")
            .expect("remote id");

        let stored = store.get_schedule_event("sev-1").expect("get").expect("row");
        assert_eq!(stored.google_calendar_event_id.as_deref(), Some(remote_id.as_str()));
        assert_eq!(stored.google_calendar_id, "primary");
        assert_eq!(stored.last_synced_at, Some(fixed_time("2024-05-01T08:00:00Z")));
        let job = store.get_job("J1").expect("get").expect("job");
        assert_eq!(job.source_google_event_id.as_deref(), Some(remote_id.as_str()));
        assert_eq!(client.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_push_updates_in_place() {
        let (store, job, event) = seeded_store();
        let client = FakeGoogleCalendarClient::default();
        let pusher = OutboundPusher::new(&client, &store, fixed_time("2024-05-01T08:00:00Z"));
        let first = pusher.push_event(&event, &job, "primary").await.expect("push");

        let linked = store.get_schedule_event("sev-1").expect("get").expect("row");
        let second = pusher.push_event(&linked, &job, "primary").await.expect("push again");

        assert_eq!(first, second);
        assert_eq!(client.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.update_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.events("primary").len(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_remote_event_recreates_it() {
        let (store, job, mut event) = seeded_store();
        event.google_calendar_event_id = Some("deleted-remotely".to_string());
        store.save_schedule_event(&event).expect("save");
        let client = FakeGoogleCalendarClient::default();
        let pusher = OutboundPusher::new(&client, &store, fixed_time("2024-05-01T08:00:00Z"));

        let remote_id = pusher
            .push_event(&event, &job, "primary")
            .await
            .expect("push")
            .expect("remote id");

        assert_ne!(remote_id, "deleted-remotely");
        let stored = store.get_schedule_event("sev-1").expect("get").expect("row");
        assert_eq!(stored.google_calendar_event_id.as_deref(), Some(remote_id.as_str()));
    }

    #[tokio::test]
    async fn provider_failure_leaves_local_row_unlinked() {
        let (store, job, event) = seeded_store();
        let client = FakeGoogleCalendarClient::default();
        client.fail_writes(Some(FakeFailure::Network));
        let pusher = OutboundPusher::new(&client, &store, fixed_time("2024-05-01T08:00:00Z"));

        assert!(pusher.push_event(&event, &job, "primary").await.is_err());
        let stored = store.get_schedule_event("sev-1").expect("get").expect("row");
        assert_eq!(stored, event);
    }

    #[tokio::test]
    async fn deleting_missing_remote_event_is_success() {
        let (store, _, _) = seeded_store();
        let client = FakeGoogleCalendarClient::default();
        let pusher = OutboundPusher::new(&client, &store, fixed_time("2024-05-01T08:00:00Z"));
        pusher
            .delete_remote_event("primary", "never-existed")
            .await
            .expect("delete is idempotent");
    }
}
