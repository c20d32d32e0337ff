//! Structured logging to stderr and to an append-only file in the workspace.

use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "fieldsync.log";

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Returns the log file path. If another subscriber is already installed it is kept.
pub fn init_logging(logs_dir: &Path, level: &str, json: bool) -> Result<PathBuf, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let log_path = logs_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid log level '{level}': {error}"))
        })?,
    };

    let file_writer = Mutex::new(file);
    let installed = if json {
        let stderr_layer = fmt::layer().json().with_writer(std::io::stderr).with_target(false);
        let file_layer = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
    } else {
        let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
    };
    if let Err(error) = installed {
        tracing::debug!(%error, "global subscriber already installed");
    }

    Ok(log_path)
}
