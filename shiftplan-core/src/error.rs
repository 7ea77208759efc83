//! Error types for shiftplan operations.

use thiserror::Error;

/// Extract the full error message from a tokio_postgres::Error,
/// including the underlying DbError details that Display hides.
pub fn format_db_error(e: &tokio_postgres::Error) -> String {
    if let Some(db_err) = e.as_db_error() {
        let mut msg = db_err.message().to_string();
        if let Some(detail) = db_err.detail() {
            msg.push_str(&format!("\n  Detail: {}", detail));
        }
        if let Some(hint) = db_err.hint() {
            msg.push_str(&format!("\n  Hint: {}", hint));
        }
        return msg;
    }
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        msg.push_str(&format!(": {}", s));
        source = s.source();
    }
    if e.is_closed() {
        msg.push_str("\n  Note: The database connection was closed unexpectedly.");
    }
    msg
}

/// All error types that shiftplan operations can produce.
#[derive(Error, Debug)]
pub enum ShiftplanError {
    /// Invalid or missing configuration (TOML parse errors, bad identifiers, etc.).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A database query or connection operation failed.
    #[error("Database error: {}", format_db_error(.0))]
    DatabaseError(#[from] tokio_postgres::Error),

    /// A change was constructed with neither an old nor a new object, or with
    /// objects of different types. This is a programming error in a driver or
    /// migration callback.
    #[error("Invalid change: {0}")]
    InvalidChange(String),

    /// A version string could not be parsed.
    #[error("Invalid version '{0}': expected dot-separated numbers such as 1.2.0")]
    InvalidVersion(String),

    /// A driver could not render a change into SQL.
    #[error("Cannot render change '{change}': {reason}")]
    RenderFailed { change: String, reason: String },

    /// A script failed to execute. Already-applied scripts are not rolled back.
    #[error("Script #{index} ({object}) failed: {reason}")]
    ScriptFailed {
        index: usize,
        object: String,
        reason: String,
    },

    /// An upgrade was requested for a plan whose status does not permit it.
    #[error("Upgrade not allowed: status is {status}")]
    UpgradeNotAllowed { status: String },

    /// Loading or saving a snapshot file failed.
    #[error("Snapshot error: {reason}")]
    SnapshotError { reason: String },

    /// A snapshot file or report could not be (de)serialized.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A filesystem I/O operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, ShiftplanError>`.
pub type Result<T> = std::result::Result<T, ShiftplanError>;
