use crate::domain::models::{next_id, Job, JobStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistence::{GoogleEventRepository, JobRepository};
use tracing::{info, warn};

/// Turns an unlinked remote event into a job.
///
/// The event row is claimed first; only the caller that wins the claim creates
/// the job, so two concurrent conversions never produce two jobs.
pub fn convert_google_event<S>(
    store: &S,
    google_event_id: &str,
    job_name: &str,
) -> Result<Job, InfraError>
where
    S: JobRepository + GoogleEventRepository + ?Sized,
{
    let google_event_id = google_event_id.trim();
    let job_name = job_name.trim();
    if job_name.is_empty() {
        return Err(InfraError::InvalidConfig("job name must not be empty".to_string()));
    }

    let event = store
        .get_google_event(google_event_id)?
        .ok_or_else(|| InfraError::NotFound(format!("google event {google_event_id}")))?;
    if event.is_converted {
        return Err(InfraError::Conflict(format!(
            "google event {google_event_id} already converted to job {}",
            event.converted_to_job_id.as_deref().unwrap_or("unknown")
        )));
    }

    let job_id = next_id("job");
    if !store.claim_conversion(&event.id, &job_id)? {
        warn!(google_event_id, "conversion lost to a concurrent claim");
        return Err(InfraError::Conflict(format!(
            "google event {google_event_id} was converted concurrently"
        )));
    }

    let mut job = Job::new(job_id, job_name);
    job.address = event.location.clone();
    job.status = JobStatus::Scheduled;
    job.scheduled_date = Some(event.start_time);
    job.source_google_event_id = Some(event.google_event_id.clone());
    store.save_job(&job)?;

    info!(
        google_event_id,
        job_id = %job.id,
        calendar_id = %event.google_calendar_id,
        "converted remote event to job"
    );
    Ok(job)
}
