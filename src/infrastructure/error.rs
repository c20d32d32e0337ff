use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Calendar authentication failed: {0}")]
    Authentication(String),
    #[error("Calendar provider error: {0}")]
    Provider(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("No inbound observation recorded for window {0}")]
    MissingObservation(String),
}

impl InfraError {
    /// The calendar connection must be re-established before retrying.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
                    || message.contains("http 429")
                    || message.contains("http 5")
            }
            _ => false,
        }
    }
}
