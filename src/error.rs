//! Error taxonomy for the reconciliation engine.
//!
//! Per-collection failures are caught and logged at the orchestrator level;
//! only failures outside the per-collection scope surface through a job's
//! `JobReport`.

#[derive(Debug)]
pub enum SyncError {
    /// External source unreachable, rate-limited, or reported query errors.
    /// The affected collection/token is skipped for this run.
    Transport(String),
    /// External payload did not match the expected shape.
    Decode(String),
    /// A catalog batch write failed. The in-flight batch is rolled back and
    /// the collection's watermark is not advanced.
    Commit(String),
    /// Invalid runtime configuration.
    Config(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Transport(msg) => write!(f, "transport error: {}", msg),
            SyncError::Decode(msg) => write!(f, "decode error: {}", msg),
            SyncError::Commit(msg) => write!(f, "commit error: {}", msg),
            SyncError::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Commit(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}
