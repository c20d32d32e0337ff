use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::calendar_preferences::{CalendarPreferenceService, DiscoveryResult};
use crate::application::calendar_sync::{CalendarSyncService, ScheduleMutation};
use crate::application::conversion::convert_google_event;
use crate::domain::civil_time::local_midnight_utc;
use crate::domain::models::{CalendarPreference, GoogleEvent, Job, ScheduleEvent, SyncWindow};
use crate::domain::sync_result::SyncPassReport;
use crate::infrastructure::config::SyncSettings;
use crate::infrastructure::credential_store::{
    CalendarCredential, CredentialStore, KeyringCredentialStore,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_client::ReqwestGoogleCalendarClient;
use crate::infrastructure::persistence::{GoogleEventRepository, ScheduleEventRepository};
use crate::infrastructure::sqlite_store::SqliteStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

const ACCESS_TOKEN_KEYS: &[&str] = &["FIELDSYNC_GOOGLE_ACCESS_TOKEN", "GOOGLE_ACCESS_TOKEN"];
const REAUTHORIZE_HINT: &str =
    "calendar connection needs to be re-established; run `fieldsync auth set-token <token>`";

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct AppState {
    workspace_root: PathBuf,
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    settings: SyncSettings,
    credentials: Arc<dyn CredentialStore>,
    env_lookup: EnvLookup,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self::from_bootstrap(bootstrap))
    }

    pub fn from_bootstrap(bootstrap: BootstrapResult) -> Self {
        Self {
            workspace_root: bootstrap.workspace_root,
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            settings: bootstrap.settings,
            credentials: Arc::new(KeyringCredentialStore::default()),
            env_lookup: Arc::new(|key: &str| std::env::var(key).ok()),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_env_lookup(mut self, env_lookup: EnvLookup) -> Self {
        self.env_lookup = env_lookup;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Logs a failed command and returns the message shown to the operator.
    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        error!(command, %error, "command failed");
        if error.is_authentication() {
            return format!("{REAUTHORIZE_HINT} ({error})");
        }
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, "{message}");
    }

    fn store(&self) -> Arc<SqliteStore> {
        Arc::new(SqliteStore::new(&self.database_path))
    }

    fn sync_service(
        &self,
    ) -> Result<CalendarSyncService<ReqwestGoogleCalendarClient, SqliteStore>, InfraError> {
        let client = ReqwestGoogleCalendarClient::new(self.access_token()?)?;
        Ok(CalendarSyncService::new(Arc::new(client), self.store())
            .with_settings(self.settings.clone()))
    }

    fn access_token(&self) -> Result<String, InfraError> {
        resolve_access_token(self.env_lookup.as_ref(), self.credentials.as_ref(), Utc::now())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub schedule_event_id: String,
    pub remote_event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub stored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn sync_now_impl(
    state: &AppState,
    from: Option<String>,
    to: Option<String>,
) -> Result<SyncPassReport, InfraError> {
    let window = resolve_sync_window(from, to, state.settings(), Utc::now())?;
    let service = state.sync_service()?;
    let report = service.run_sync_pass(window).await?;

    state.log_info(
        "sync",
        &format!(
            "synchronized window={} created={} updated={} skipped={} cancelled={} rescheduled={}",
            report.window,
            report.inbound.created.total(),
            report.inbound.updated.total(),
            report.inbound.skipped,
            report.drift.cancelled,
            report.drift.rescheduled
        ),
    );
    Ok(report)
}

pub async fn push_schedule_event_impl(
    state: &AppState,
    schedule_event_id: String,
) -> Result<PushResponse, InfraError> {
    let schedule_event_id = required_id(&schedule_event_id, "schedule_event_id")?;
    let service = state.sync_service()?;
    let remote_event_id = service.push_local_event(schedule_event_id).await?;

    state.log_info(
        "push",
        &format!(
            "pushed schedule_event_id={schedule_event_id} remote={}",
            remote_event_id.as_deref().unwrap_or("none")
        ),
    );
    Ok(PushResponse {
        schedule_event_id: schedule_event_id.to_string(),
        remote_event_id,
    })
}

pub async fn adjust_schedule_event_time_impl(
    state: &AppState,
    schedule_event_id: String,
    start_at: String,
    end_at: String,
) -> Result<ScheduleMutation, InfraError> {
    let schedule_event_id = required_id(&schedule_event_id, "schedule_event_id")?;
    let timezone = state.settings().timezone;
    let start = parse_datetime_input(&start_at, "start_at", timezone)?;
    let end = parse_datetime_input(&end_at, "end_at", timezone)?;
    if end <= start {
        return Err(InfraError::InvalidConfig(
            "end_at must be after start_at".to_string(),
        ));
    }

    let service = state.sync_service()?;
    let outcome = service
        .adjust_schedule_event_time(schedule_event_id, start, end)
        .await?;
    state.log_info(
        "adjust",
        &format!("adjusted schedule_event_id={schedule_event_id} start={start} end={end}"),
    );
    Ok(outcome)
}

pub async fn delete_schedule_event_impl(
    state: &AppState,
    schedule_event_id: String,
) -> Result<ScheduleMutation, InfraError> {
    let schedule_event_id = required_id(&schedule_event_id, "schedule_event_id")?;
    let service = state.sync_service()?;
    let outcome = service.delete_schedule_event(schedule_event_id).await?;
    state.log_info("delete", &format!("deleted schedule_event_id={schedule_event_id}"));
    Ok(outcome)
}

pub fn convert_google_event_impl(
    state: &AppState,
    google_event_id: String,
    job_name: String,
) -> Result<Job, InfraError> {
    let google_event_id = required_id(&google_event_id, "google_event_id")?;
    let job = convert_google_event(state.store().as_ref(), google_event_id, &job_name)?;
    state.log_info(
        "convert",
        &format!("converted google_event_id={google_event_id} job_id={}", job.id),
    );
    Ok(job)
}

pub fn list_unconverted_events_impl(
    state: &AppState,
    from: Option<String>,
    to: Option<String>,
) -> Result<Vec<GoogleEvent>, InfraError> {
    let window = resolve_sync_window(from, to, state.settings(), Utc::now())?;
    state.store().list_unconverted_google_events(&window)
}

pub fn list_schedule_events_impl(
    state: &AppState,
    job_id: String,
) -> Result<Vec<ScheduleEvent>, InfraError> {
    let job_id = required_id(&job_id, "job_id")?;
    state.store().list_schedule_events_for_job(job_id)
}

pub fn list_calendars_impl(state: &AppState) -> Result<Vec<CalendarPreference>, InfraError> {
    let store = state.store();
    CalendarPreferenceService::new(store.as_ref()).list_preferences()
}

pub async fn discover_calendars_impl(state: &AppState) -> Result<DiscoveryResult, InfraError> {
    let client = ReqwestGoogleCalendarClient::new(state.access_token()?)?;
    let store = state.store();
    let result = CalendarPreferenceService::new(store.as_ref())
        .discover_calendars(&client)
        .await?;
    state.log_info(
        "calendars_discover",
        &format!("discovered added={} refreshed={}", result.added.len(), result.refreshed.len()),
    );
    Ok(result)
}

pub fn set_calendar_enabled_impl(
    state: &AppState,
    calendar_id: String,
    enabled: bool,
) -> Result<CalendarPreference, InfraError> {
    let store = state.store();
    let preference = CalendarPreferenceService::new(store.as_ref())
        .set_calendar_enabled(&calendar_id, enabled)?;
    state.log_info(
        "calendars_toggle",
        &format!("calendar_id={} enabled={enabled}", preference.calendar_id),
    );
    Ok(preference)
}

pub fn set_access_token_impl(
    state: &AppState,
    access_token: String,
    expires_at: Option<String>,
) -> Result<CredentialStatus, InfraError> {
    let access_token = access_token.trim();
    if access_token.is_empty() {
        return Err(InfraError::InvalidConfig(
            "access_token must not be empty".to_string(),
        ));
    }
    let expires_at = expires_at
        .as_deref()
        .map(|raw| parse_datetime_input(raw, "expires_at", state.settings().timezone))
        .transpose()?;

    let mut credential = CalendarCredential::bearer(access_token);
    credential.expires_at = expires_at;
    state.credentials.save_credential(&credential)?;
    state.log_info("auth_set_token", "stored calendar access token");
    Ok(CredentialStatus {
        stored: true,
        expires_at,
    })
}

pub fn clear_access_token_impl(state: &AppState) -> Result<CredentialStatus, InfraError> {
    state.credentials.delete_credential()?;
    state.log_info("auth_clear", "removed calendar access token");
    Ok(CredentialStatus {
        stored: false,
        expires_at: None,
    })
}

fn resolve_access_token<F, K>(
    lookup: &F,
    credentials: &K,
    now: DateTime<Utc>,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String> + ?Sized,
    K: CredentialStore + ?Sized,
{
    if let Some(token) = optional_lookup_value(lookup, ACCESS_TOKEN_KEYS) {
        return Ok(token);
    }
    match credentials.load_credential()? {
        Some(credential) if credential.is_usable_at(now) => Ok(credential.access_token),
        Some(_) => Err(InfraError::Authentication(
            "stored calendar access token has expired".to_string(),
        )),
        None => Err(InfraError::Authentication(format!(
            "no calendar access token (set one of: {})",
            ACCESS_TOKEN_KEYS.join(", ")
        ))),
    }
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String> + ?Sized,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

fn required_id<'a>(value: &'a str, field_name: &str) -> Result<&'a str, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InfraError::InvalidConfig(format!(
            "{field_name} must not be empty"
        )));
    }
    Ok(value)
}

/// Explicit bounds win; otherwise the configured number of days around today
/// in the organisation's time zone.
fn resolve_sync_window(
    from: Option<String>,
    to: Option<String>,
    settings: &SyncSettings,
    now: DateTime<Utc>,
) -> Result<SyncWindow, InfraError> {
    let local_today = now.with_timezone(&settings.timezone).date_naive();
    let today = local_midnight_utc(local_today, settings.timezone);
    let start = match from {
        Some(raw) => parse_datetime_input(&raw, "from", settings.timezone)?,
        None => Duration::try_days(settings.window_past_days)
            .and_then(|span| today.checked_sub_signed(span))
            .ok_or_else(|| {
                InfraError::InvalidConfig("windowPastDays is out of range".to_string())
            })?,
    };
    let end = match to {
        Some(raw) => parse_datetime_input(&raw, "to", settings.timezone)?,
        None => Duration::try_days(settings.window_future_days)
            .and_then(|span| today.checked_add_signed(span))
            .ok_or_else(|| {
                InfraError::InvalidConfig("windowFutureDays is out of range".to_string())
            })?,
    };
    SyncWindow::new(start, end).map_err(InfraError::InvalidConfig)
}

fn parse_datetime_input(
    value: &str,
    field_name: &str,
    timezone: Tz,
) -> Result<DateTime<Utc>, InfraError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(local_midnight_utc(date, timezone));
    }
    Err(InfraError::InvalidConfig(format!(
        "{field_name} must be RFC3339 or YYYY-MM-DD"
    )))
}
