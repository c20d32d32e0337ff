use crate::application::calendar_preferences::CalendarPreferenceService;
use crate::application::drift_detection::reconcile_drift;
use crate::application::inbound_sync::InboundReconciler;
use crate::application::outbound_push::OutboundPusher;
use crate::domain::models::{Job, ScheduleEvent, SyncWindow};
use crate::domain::sync_result::{
    DriftResult, IssueKind, ObservedEvents, SyncIssue, SyncPassReport, SyncResult,
};
use crate::infrastructure::config::SyncSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::GoogleCalendarEvent;
use crate::infrastructure::google_calendar_client::{GoogleCalendarClient, ListEventsRequest};
use crate::infrastructure::persistence::PersistenceStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{debug, error, info, warn};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.retry_max_attempts,
            base_delay_ms: settings.retry_base_delay_ms,
        }
    }
}

/// Result of a local schedule change followed by a push attempt.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMutation {
    pub schedule_event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_event: Option<ScheduleEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_error: Option<String>,
}

pub struct CalendarSyncService<C, S>
where
    C: GoogleCalendarClient,
    S: PersistenceStore,
{
    calendar_client: Arc<C>,
    store: Arc<S>,
    settings: SyncSettings,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
    last_observation: Mutex<Option<ObservedEvents>>,
}

impl<C, S> CalendarSyncService<C, S>
where
    C: GoogleCalendarClient,
    S: PersistenceStore,
{
    pub fn new(calendar_client: Arc<C>, store: Arc<S>) -> Self {
        Self {
            calendar_client,
            store,
            settings: SyncSettings::default(),
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
            last_observation: Mutex::new(None),
        }
    }

    /// Replaces the settings; the retry policy follows the new settings.
    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.retry_policy = RetryPolicy::from_settings(&settings);
        self.settings = settings;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Pulls every enabled calendar for `window` into the local store.
    ///
    /// An authentication failure aborts the pass immediately. Any other fetch
    /// failure is recorded against its calendar and the pass moves on; the
    /// error is returned only when no calendar could be fetched at all.
    /// The previous observation is discarded first, so a failed pass leaves
    /// drift detection without an observation.
    pub async fn run_inbound_sync(&self, window: SyncWindow) -> Result<SyncResult, InfraError> {
        self.clear_observation()?;
        let (result, observed) = self.pull_calendars(window).await?;
        self.store_observation(observed)?;
        Ok(result)
    }

    async fn pull_calendars(
        &self,
        window: SyncWindow,
    ) -> Result<(SyncResult, ObservedEvents), InfraError> {
        let preferences = CalendarPreferenceService::new(self.store.as_ref());
        let targets = preferences.resolve_sync_targets()?;
        let synced_at = (self.now_provider)();
        let reconciler =
            InboundReconciler::new(self.store.as_ref(), self.settings.timezone, synced_at);

        let mut result = SyncResult::default();
        let mut observed = ObservedEvents::new(window);
        let mut last_failure = None;

        // Nothing fetched is not evidence that anything disappeared.
        if targets.is_empty() {
            info!(%window, "no calendars enabled for sync");
            observed.mark_incomplete();
        }

        for calendar_id in &targets {
            match self.list_events_with_retry(calendar_id, window).await {
                Ok(events) => {
                    debug!(
                        calendar_id = %calendar_id,
                        fetched = events.len(),
                        "fetched calendar events"
                    );
                    reconciler.reconcile_calendar(calendar_id, &events, &mut result, &mut observed);
                    result.record_calendar_synced(calendar_id);
                    if let Err(error) = preferences.mark_calendar_synced(calendar_id, synced_at) {
                        warn!(
                            calendar_id = %calendar_id,
                            %error,
                            "failed to stamp calendar sync time"
                        );
                    }
                }
                Err(error) if error.is_authentication() => {
                    error!(calendar_id = %calendar_id, %error, "calendar authentication failed");
                    return Err(error);
                }
                Err(error) => {
                    warn!(calendar_id = %calendar_id, %error, "calendar fetch failed");
                    result.record_calendar_failure(
                        SyncIssue::new(IssueKind::ProviderFailure, error.to_string())
                            .calendar(calendar_id),
                    );
                    observed.mark_incomplete();
                    last_failure = Some(error);
                }
            }
        }

        if result.calendars.is_empty() {
            if let Some(error) = last_failure {
                return Err(error);
            }
        }

        info!(
            %window,
            created_linked = result.created.linked,
            created_unlinked = result.created.unlinked,
            updated_linked = result.updated.linked,
            updated_unlinked = result.updated.unlinked,
            skipped = result.skipped,
            processed = result.processed(),
            complete = observed.is_complete(),
            "inbound sync finished"
        );
        Ok((result, observed))
    }

    /// Cancellation and reschedule pass over the ids seen by the most recent
    /// inbound pass for the same window.
    pub fn run_drift_detection(&self, window: SyncWindow) -> Result<DriftResult, InfraError> {
        let guard = self
            .last_observation
            .lock()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("observation lock poisoned: {error}"))
            })?;
        let observed = guard
            .as_ref()
            .filter(|observed| observed.window() == window)
            .ok_or_else(|| InfraError::MissingObservation(window.to_string()))?;
        reconcile_drift(self.store.as_ref(), observed, &self.settings)
    }

    pub async fn run_sync_pass(&self, window: SyncWindow) -> Result<SyncPassReport, InfraError> {
        self.clear_observation()?;
        let (inbound, observed) = self.pull_calendars(window).await?;
        let drift = reconcile_drift(self.store.as_ref(), &observed, &self.settings)?;
        self.store_observation(observed)?;
        Ok(SyncPassReport {
            window,
            inbound,
            drift,
        })
    }

    /// Pushes one local schedule event to the calendar it is assigned to.
    pub async fn push_local_event(
        &self,
        schedule_event_id: &str,
    ) -> Result<Option<String>, InfraError> {
        let (event, job) = self.load_event_with_job(schedule_event_id)?;
        let calendar_id = event.google_calendar_id.clone();
        self.pusher().push_event(&event, &job, &calendar_id).await
    }

    /// Moves a schedule event locally, then mirrors the change.
    ///
    /// The local change stands even when the push fails.
    pub async fn adjust_schedule_event_time(
        &self,
        schedule_event_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<ScheduleMutation, InfraError> {
        let (mut event, job) = self.load_event_with_job(schedule_event_id)?;
        event.start_time = start_time;
        event.end_time = end_time;
        event.validate().map_err(InfraError::InvalidConfig)?;
        self.store.save_schedule_event(&event)?;
        info!(
            schedule_event_id,
            start = %start_time,
            end = %end_time,
            "schedule event moved locally"
        );

        let calendar_id = event.google_calendar_id.clone();
        let pushed = self.pusher().push_event(&event, &job, &calendar_id).await;
        let (remote_event_id, push_error) = match pushed {
            Ok(remote_event_id) => (remote_event_id, None),
            Err(error) => {
                warn!(
                    schedule_event_id,
                    %error,
                    "push after local change failed; will retry on next push"
                );
                (event.remote_event_id().map(ToOwned::to_owned), Some(error.to_string()))
            }
        };

        Ok(ScheduleMutation {
            schedule_event_id: schedule_event_id.to_string(),
            schedule_event: self.store.get_schedule_event(schedule_event_id)?,
            remote_event_id,
            push_error,
        })
    }

    /// Deletes a schedule event locally, then removes its remote copy if any.
    pub async fn delete_schedule_event(
        &self,
        schedule_event_id: &str,
    ) -> Result<ScheduleMutation, InfraError> {
        let event = self
            .store
            .get_schedule_event(schedule_event_id)?
            .ok_or_else(|| InfraError::NotFound(format!("schedule event {schedule_event_id}")))?;
        self.store.delete_schedule_event(schedule_event_id)?;
        info!(schedule_event_id, "schedule event deleted locally");

        let remote_event_id = event.remote_event_id().map(ToOwned::to_owned);
        let mut push_error = None;
        if let Some(remote_id) = remote_event_id.as_deref() {
            let deleted = self
                .pusher()
                .delete_remote_event(&event.google_calendar_id, remote_id)
                .await;
            if let Err(error) = deleted {
                warn!(schedule_event_id, event_id = remote_id, %error, "remote delete failed");
                push_error = Some(error.to_string());
            }
        }

        Ok(ScheduleMutation {
            schedule_event_id: schedule_event_id.to_string(),
            schedule_event: None,
            remote_event_id,
            push_error,
        })
    }

    fn pusher(&self) -> OutboundPusher<'_, C, S> {
        OutboundPusher::new(
            self.calendar_client.as_ref(),
            self.store.as_ref(),
            (self.now_provider)(),
        )
    }

    fn load_event_with_job(
        &self,
        schedule_event_id: &str,
    ) -> Result<(ScheduleEvent, Job), InfraError> {
        let event = self
            .store
            .get_schedule_event(schedule_event_id)?
            .ok_or_else(|| InfraError::NotFound(format!("schedule event {schedule_event_id}")))?;
        let job = self
            .store
            .get_job(&event.job_id)?
            .ok_or_else(|| InfraError::NotFound(format!("job {}", event.job_id)))?;
        Ok((event, job))
    }

    fn store_observation(&self, observed: ObservedEvents) -> Result<(), InfraError> {
        self.replace_observation(Some(observed))
    }

    fn clear_observation(&self) -> Result<(), InfraError> {
        self.replace_observation(None)
    }

    fn replace_observation(&self, observed: Option<ObservedEvents>) -> Result<(), InfraError> {
        let mut guard = self
            .last_observation
            .lock()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("observation lock poisoned: {error}"))
            })?;
        *guard = observed;
        Ok(())
    }

    async fn list_events_with_retry(
        &self,
        calendar_id: &str,
        window: SyncWindow,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let request = ListEventsRequest {
            time_min: window.start,
            time_max: window.end,
        };
        let mut attempt: u8 = 0;

        loop {
            match self.calendar_client.list_events(calendar_id, request).await {
                Ok(events) => return Ok(events),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    debug!(
                        calendar_id,
                        attempt,
                        delay_ms = delay,
                        %error,
                        "retrying calendar fetch"
                    );
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}
