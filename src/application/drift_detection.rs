use crate::domain::models::Job;
use crate::domain::sync_result::{DriftResult, IssueKind, ObservedEvents, SyncIssue};
use crate::infrastructure::config::SyncSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistence::JobRepository;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// Compares locally linked jobs in the observation's window with what the
/// provider returned.
///
/// A job whose remote event was not observed is cancelled. A job whose event
/// was observed at a different time is rescheduled. A cancelled job whose
/// event shows up again is restored. Only loading the job list can fail the
/// whole pass; a failing job is counted and skipped.
pub fn reconcile_drift<S>(
    store: &S,
    observed: &ObservedEvents,
    settings: &SyncSettings,
) -> Result<DriftResult, InfraError>
where
    S: JobRepository + ?Sized,
{
    let window = observed.window();
    let jobs = store.list_linked_jobs_in_window(&window)?;
    let mut result = DriftResult {
        cancellation_suppressed: !observed.is_complete()
            && settings.suppress_cancellation_on_partial_fetch,
        ..DriftResult::default()
    };
    if result.cancellation_suppressed {
        warn!(%window, "calendar fetch was incomplete; cancellations suppressed for this pass");
    }

    for job in jobs {
        let tolerance = settings.reschedule_tolerance;
        if let Err(error) = reconcile_job(store, &job, observed, tolerance, &mut result) {
            warn!(job_id = %job.id, %error, "drift check failed for job");
            let mut issue = SyncIssue::new(IssueKind::DriftFailure, error.to_string()).job(&job.id);
            if let Some(remote_id) = job.source_google_event_id.as_deref() {
                issue = issue.event(remote_id);
            }
            result.record_failure(issue);
        }
    }

    info!(
        %window,
        cancelled = result.cancelled,
        uncancelled = result.uncancelled,
        rescheduled = result.rescheduled,
        completed_but_rescheduled = result.completed_but_rescheduled,
        failed = result.failed,
        "drift detection finished"
    );
    Ok(result)
}

fn reconcile_job<S>(
    store: &S,
    job: &Job,
    observed: &ObservedEvents,
    tolerance: Duration,
    result: &mut DriftResult,
) -> Result<(), InfraError>
where
    S: JobRepository + ?Sized,
{
    let Some(remote_id) = job
        .source_google_event_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(());
    };

    let Some(observed_start) = observed.lookup(remote_id) else {
        if result.cancellation_suppressed {
            return Ok(());
        }
        if store.set_job_cancelled(&job.id, true)? {
            info!(
                job_id = %job.id,
                event_id = remote_id,
                "remote event disappeared; job cancelled"
            );
            result.cancelled += 1;
        }
        return Ok(());
    };

    if job.is_cancelled && store.set_job_cancelled(&job.id, false)? {
        info!(job_id = %job.id, event_id = remote_id, "remote event reappeared; job restored");
        result.uncancelled += 1;
    }

    let (Some(observed_start), Some(scheduled)) = (observed_start, job.scheduled_date) else {
        return Ok(());
    };
    if !exceeds_tolerance(scheduled, observed_start, tolerance) {
        return Ok(());
    }

    store.record_job_reschedule(&job.id, Some(scheduled), observed_start)?;
    result.rescheduled += 1;
    info!(
        job_id = %job.id,
        event_id = remote_id,
        from = %scheduled,
        to = %observed_start,
        "job rescheduled from calendar"
    );

    if job.status.is_completed() {
        result.completed_but_rescheduled += 1;
        warn!(
            job_id = %job.id,
            event_id = remote_id,
            status = job.status.as_str(),
            from = %scheduled,
            to = %observed_start,
            "completed job was moved on the calendar"
        );
    }
    Ok(())
}

fn exceeds_tolerance(stored: DateTime<Utc>, observed: DateTime<Utc>, tolerance: Duration) -> bool {
    (observed - stored).num_milliseconds().abs() > tolerance.num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{fixed_time, sample_job};
    use crate::domain::models::{JobStatus, SyncWindow};
    use crate::infrastructure::memory_store::InMemoryStore;
    use proptest::prelude::*;

    fn window() -> SyncWindow {
        SyncWindow::new(
            fixed_time("2024-05-01T00:00:00Z"),
            fixed_time("2024-05-08T00:00:00Z"),
        )
        .expect("window")
    }

    fn observation(entries: &[(&str, Option<&str>)]) -> ObservedEvents {
        let mut observed = ObservedEvents::new(window());
        for (remote_id, start) in entries {
            observed.observe(remote_id, start.map(fixed_time));
        }
        observed
    }

    #[test]
    fn absent_event_cancels_job_once() {
        let store = InMemoryStore::default();
        store
            .save_job(&sample_job("J1", Some("evt-1"), "2024-05-01T09:00:00Z"))
            .expect("save");
        let settings = SyncSettings::default();

        let first = reconcile_drift(&store, &observation(&[]), &settings).expect("first pass");
        let second = reconcile_drift(&store, &observation(&[]), &settings).expect("second pass");

        assert_eq!(first.cancelled, 1);
        assert_eq!(second.cancelled, 0);
        assert!(store.get_job("J1").expect("get").expect("job").is_cancelled);
    }

    #[test]
    fn reappearing_event_restores_job() {
        let store = InMemoryStore::default();
        store
            .save_job(&sample_job("J1", Some("evt-1"), "2024-05-01T09:00:00Z"))
            .expect("save");
        let settings = SyncSettings::default();

        reconcile_drift(&store, &observation(&[]), &settings).expect("cancel pass");
        let restored = reconcile_drift(
            &store,
            &observation(&[("evt-1", Some("2024-05-01T09:00:00Z"))]),
            &settings,
        )
        .expect("restore pass");

        assert_eq!(restored.uncancelled, 1);
        assert_eq!(restored.rescheduled, 0);
        assert!(!store.get_job("J1").expect("get").expect("job").is_cancelled);
    }

    #[test]
    fn jitter_within_tolerance_is_not_a_reschedule() {
        let store = InMemoryStore::default();
        store
            .save_job(&sample_job("J1", Some("evt-1"), "2024-05-01T09:00:00Z"))
            .expect("save");

        let result = reconcile_drift(
            &store,
            &observation(&[("evt-1", Some("2024-05-01T09:00:45Z"))]),
            &SyncSettings::default(),
        )
        .expect("pass");

        assert_eq!(result.rescheduled, 0);
        let job = store.get_job("J1").expect("get").expect("job");
        assert_eq!(job.scheduled_date, Some(fixed_time("2024-05-01T09:00:00Z")));
        assert_eq!(job.original_scheduled_date, None);
    }

    #[test]
    fn completed_job_is_moved_and_flagged() {
        let store = InMemoryStore::default();
        let mut job = sample_job("J1", Some("evt-1"), "2024-05-01T09:00:00Z");
        job.status = JobStatus::Done;
        store.save_job(&job).expect("save");

        let result = reconcile_drift(
            &store,
            &observation(&[("evt-1", Some("2024-05-02T09:00:00Z"))]),
            &SyncSettings::default(),
        )
        .expect("pass");

        assert_eq!(result.rescheduled, 1);
        assert_eq!(result.completed_but_rescheduled, 1);
        let stored = store.get_job("J1").expect("get").expect("job");
        assert_eq!(stored.scheduled_date, Some(fixed_time("2024-05-02T09:00:00Z")));
        assert_eq!(stored.original_scheduled_date, Some(fixed_time("2024-05-01T09:00:00Z")));
    }

    #[test]
    fn incomplete_observation_suppresses_cancellation_only() {
        let store = InMemoryStore::default();
        store
            .save_job(&sample_job("J-missing", Some("evt-missing"), "2024-05-01T09:00:00Z"))
            .expect("save");
        store
            .save_job(&sample_job("J-moved", Some("evt-moved"), "2024-05-01T10:00:00Z"))
            .expect("save");

        let mut observed = observation(&[("evt-moved", Some("2024-05-01T12:00:00Z"))]);
        observed.mark_incomplete();
        let result = reconcile_drift(&store, &observed, &SyncSettings::default()).expect("pass");

        assert!(result.cancellation_suppressed);
        assert_eq!(result.cancelled, 0);
        assert_eq!(result.rescheduled, 1);
        assert!(!store.get_job("J-missing").expect("get").expect("job").is_cancelled);

        let strict = SyncSettings {
            suppress_cancellation_on_partial_fetch: false,
            ..SyncSettings::default()
        };
        let result = reconcile_drift(&store, &observed, &strict).expect("strict pass");
        assert!(!result.cancellation_suppressed);
        assert_eq!(result.cancelled, 1);
    }

    #[test]
    fn observed_without_time_only_counts_as_present() {
        let store = InMemoryStore::default();
        store
            .save_job(&sample_job("J1", Some("evt-1"), "2024-05-01T09:00:00Z"))
            .expect("save");

        let observed = observation(&[("evt-1", None)]);
        let result = reconcile_drift(&store, &observed, &SyncSettings::default()).expect("pass");
        assert_eq!(result, DriftResult::default());
    }

    #[test]
    fn failing_job_does_not_block_the_rest() {
        let store = InMemoryStore::default();
        store
            .save_job(&sample_job("J-bad", Some("evt-bad"), "2024-05-01T09:00:00Z"))
            .expect("save");
        store
            .save_job(&sample_job("J-good", Some("evt-good"), "2024-05-01T10:00:00Z"))
            .expect("save");
        store.fail_writes_for("J-bad");

        let result =
            reconcile_drift(&store, &observation(&[]), &SyncSettings::default()).expect("pass");
        assert_eq!(result.failed, 1);
        assert_eq!(result.cancelled, 1);
        assert_eq!(result.issues[0].job_id.as_deref(), Some("J-bad"));
        assert_eq!(result.issues[0].kind, IssueKind::DriftFailure);
    }

    // Feature: fieldsync, Property 5: the first original date survives repeated reschedules
    proptest! {
        #[test]
        fn property5_reschedules_preserve_first_original(
            offsets in prop::collection::vec(2i64..5_000, 1..6)
        ) {
            let store = InMemoryStore::default();
            let t0 = fixed_time("2024-05-01T09:00:00Z");
            store.save_job(&sample_job("J1", Some("evt-1"), "2024-05-01T09:00:00Z")).expect("save");

            let mut current = t0;
            for offset in &offsets {
                current += Duration::minutes(*offset);
                let window = SyncWindow::new(t0 - Duration::days(1), current + Duration::days(1))
                    .expect("window");
                let mut observed = ObservedEvents::new(window);
                observed.observe("evt-1", Some(current));
                let result =
                    reconcile_drift(&store, &observed, &SyncSettings::default()).expect("pass");
                prop_assert_eq!(result.rescheduled, 1);
            }

            let job = store.get_job("J1").expect("get").expect("job");
            prop_assert_eq!(job.original_scheduled_date, Some(t0));
            prop_assert_eq!(job.scheduled_date, Some(current));
        }
    }

    // Feature: fieldsync, Property 4: cancellation is applied exactly once
    proptest! {
        #[test]
        fn property4_cancellation_is_idempotent(passes in 2usize..6) {
            let store = InMemoryStore::default();
            store.save_job(&sample_job("J1", Some("evt-1"), "2024-05-01T09:00:00Z")).expect("save");

            let total: usize = (0..passes)
                .map(|_| {
                    reconcile_drift(&store, &observation(&[]), &SyncSettings::default())
                        .expect("pass")
                        .cancelled
                })
                .sum();
            prop_assert_eq!(total, 1);
        }
    }
}
