use crate::infrastructure::config::{ensure_default_configs, load_sync_settings, SyncSettings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATABASE_FILE_NAME: &str = "fieldsync.sqlite";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    #[serde(skip)]
    pub settings: SyncSettings,
}

fn workspace_paths(workspace_root: &Path) -> (PathBuf, PathBuf, PathBuf, PathBuf) {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join(DATABASE_FILE_NAME);
    (config_dir, state_dir, logs_dir, database_path)
}

/// Creates the workspace layout, default configs and schema. Safe to run repeatedly.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let (config_dir, state_dir, logs_dir, database_path) = workspace_paths(workspace_root);

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let settings = load_sync_settings(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
        settings,
    })
}
