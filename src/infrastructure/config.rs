use crate::domain::civil_time::parse_timezone;
use crate::infrastructure::error::InfraError;
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SYNC_JSON: &str = "sync.json";

const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_RESCHEDULE_TOLERANCE_SECONDS: i64 = 60;
const DEFAULT_WINDOW_PAST_DAYS: i64 = 1;
const DEFAULT_WINDOW_FUTURE_DAYS: i64 = 30;
const DEFAULT_RETRY_MAX_ATTEMPTS: u8 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
const MAX_RESCHEDULE_TOLERANCE_SECONDS: i64 = 7 * 86_400;
const MAX_WINDOW_DAYS: i64 = 3_660;
const MAX_RETRY_BASE_DELAY_MS: u64 = 60_000;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub sync: serde_json::Value,
}

/// Settings resolved once per invocation and handed to the sync services.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub timezone: Tz,
    /// Start-time differences up to this size are clock/serialization noise, not reschedules.
    pub reschedule_tolerance: Duration,
    pub window_past_days: i64,
    pub window_future_days: i64,
    pub retry_max_attempts: u8,
    pub retry_base_delay_ms: u64,
    pub suppress_cancellation_on_partial_fetch: bool,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            reschedule_tolerance: Duration::seconds(DEFAULT_RESCHEDULE_TOLERANCE_SECONDS),
            window_past_days: DEFAULT_WINDOW_PAST_DAYS,
            window_future_days: DEFAULT_WINDOW_FUTURE_DAYS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            suppress_cancellation_on_partial_fetch: true,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "FieldSync",
                "timezone": DEFAULT_TIMEZONE,
                "logLevel": DEFAULT_LOG_LEVEL,
                "logJson": false
            }),
        ),
        (
            SYNC_JSON,
            serde_json::json!({
                "schema": 1,
                "rescheduleToleranceSeconds": DEFAULT_RESCHEDULE_TOLERANCE_SECONDS,
                "windowPastDays": DEFAULT_WINDOW_PAST_DAYS,
                "windowFutureDays": DEFAULT_WINDOW_FUTURE_DAYS,
                "retry": {
                    "maxAttempts": DEFAULT_RETRY_MAX_ATTEMPTS,
                    "baseDelayMs": DEFAULT_RETRY_BASE_DELAY_MS
                },
                "suppressCancellationOnPartialFetch": true
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        sync: read_config(&config_dir.join(SYNC_JSON))?,
    })
}

pub fn load_sync_settings(config_dir: &Path) -> Result<SyncSettings, InfraError> {
    let bundle = load_configs(config_dir)?;
    sync_settings_from_bundle(&bundle)
}

fn sync_settings_from_bundle(bundle: &ConfigBundle) -> Result<SyncSettings, InfraError> {
    let defaults = SyncSettings::default();

    let timezone = match read_str(&bundle.app, "timezone") {
        Some(name) => parse_timezone(name).map_err(InfraError::InvalidConfig)?,
        None => defaults.timezone,
    };

    let tolerance_seconds = read_i64(&bundle.sync, "rescheduleToleranceSeconds")?
        .unwrap_or(DEFAULT_RESCHEDULE_TOLERANCE_SECONDS);
    if !(0..=MAX_RESCHEDULE_TOLERANCE_SECONDS).contains(&tolerance_seconds) {
        return Err(InfraError::InvalidConfig(format!(
            "rescheduleToleranceSeconds must be between 0 and {MAX_RESCHEDULE_TOLERANCE_SECONDS}"
        )));
    }

    let window_past_days =
        read_i64(&bundle.sync, "windowPastDays")?.unwrap_or(defaults.window_past_days);
    let window_future_days =
        read_i64(&bundle.sync, "windowFutureDays")?.unwrap_or(defaults.window_future_days);
    let day_range = 0..=MAX_WINDOW_DAYS;
    if !day_range.contains(&window_past_days)
        || !day_range.contains(&window_future_days)
        || window_past_days + window_future_days == 0
    {
        return Err(InfraError::InvalidConfig(format!(
            "windowPastDays and windowFutureDays must be in 0..={MAX_WINDOW_DAYS}, not both zero"
        )));
    }

    let retry = bundle.sync.get("retry");
    let read_retry = |key: &str| {
        retry
            .map(|value| read_i64(value, key))
            .transpose()
            .map(Option::flatten)
    };
    let retry_max_attempts = match read_retry("maxAttempts")? {
        Some(value) => u8::try_from(value.clamp(1, 10)).unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
        None => defaults.retry_max_attempts,
    };
    let retry_base_delay_ms = match read_retry("baseDelayMs")? {
        Some(value) => u64::try_from(value)
            .ok()
            .filter(|delay| *delay <= MAX_RETRY_BASE_DELAY_MS)
            .ok_or_else(|| {
                InfraError::InvalidConfig(format!(
                    "retry.baseDelayMs must be between 0 and {MAX_RETRY_BASE_DELAY_MS}"
                ))
            })?,
        None => defaults.retry_base_delay_ms,
    };

    Ok(SyncSettings {
        timezone,
        reschedule_tolerance: Duration::seconds(tolerance_seconds),
        window_past_days,
        window_future_days,
        retry_max_attempts,
        retry_base_delay_ms,
        suppress_cancellation_on_partial_fetch: bundle
            .sync
            .get("suppressCancellationOnPartialFetch")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(defaults.suppress_cancellation_on_partial_fetch),
        log_level: read_str(&bundle.app, "logLevel")
            .unwrap_or(DEFAULT_LOG_LEVEL)
            .to_string(),
        log_json: bundle
            .app
            .get("logJson")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
    })
}

fn read_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn read_i64(value: &serde_json::Value, key: &str) -> Result<Option<i64>, InfraError> {
    match value.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(raw) => raw
            .as_i64()
            .map(Some)
            .ok_or_else(|| InfraError::InvalidConfig(format!("{key} must be an integer"))),
    }
}
