use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefrainError {
    #[error("{0}")]
    Generic(String),
    #[error(transparent)]
    Expected(#[from] RefrainExpectedError),
    #[error("Database error: {0}")]
    Database(rusqlite::Error),
    #[error("Database is locked: could not acquire the writer lock within the busy timeout")]
    WriteConflict,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// SQLITE_BUSY means the writer busy timeout expired; callers treat that as a
// retryable write conflict rather than a generic database failure.
impl From<rusqlite::Error> for RefrainError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy || err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                RefrainError::WriteConflict
            }
            _ => RefrainError::Database(e),
        }
    }
}

/// These errors are printed without a traceback.
#[derive(Error, Debug, Clone)]
pub enum RefrainExpectedError {
    #[error("{0}")]
    Generic(String),
    #[error("Track does not exist: {id}")]
    TrackDoesNotExist { id: String },
    #[error("Library file does not exist: {id}")]
    FileDoesNotExist { id: i64 },
    #[error("Playlist does not exist: {id}")]
    PlaylistDoesNotExist { id: String },
    #[error("File not found: {path:?}")]
    FileNotFound { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, RefrainError>;
