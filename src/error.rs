use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Export error: {0}")]
    ExportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, JournalError>;

impl JournalError {
    /// Whether the view layer may offer the user a retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            JournalError::Unavailable(_) | JournalError::TransactionAborted(_)
        )
    }
}

impl From<rusqlite::Error> for JournalError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                JournalError::Unavailable(err.to_string())
            }
            _ => JournalError::DatabaseError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for JournalError {
    fn from(err: serde_json::Error) -> Self {
        JournalError::SerializationError(err.to_string())
    }
}

impl From<csv::Error> for JournalError {
    fn from(err: csv::Error) -> Self {
        JournalError::ExportError(err.to_string())
    }
}

impl From<std::io::Error> for JournalError {
    fn from(err: std::io::Error) -> Self {
        JournalError::Unavailable(err.to_string())
    }
}
