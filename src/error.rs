//! Error types for enclave-db handles.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("database not found in read-only mode: {}", .0.display())]
    NotFoundReadOnly(PathBuf),

    #[error("engine runtime failed to load: {0}")]
    Runtime(String),

    #[error("handle closed")]
    Closed,

    #[error("statement finalized")]
    Finalized,

    #[error("statement preparation failed: {0}")]
    Prepare(String),

    #[error("invalid parameters: {0}")]
    Parameter(String),

    #[error("SQLite error: {0}")]
    Engine(#[from] rusqlite::Error),

    #[error("operation queue error: {0}")]
    Queue(String),

    #[error("queued task panicked: {0}")]
    TaskPanicked(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// True for errors that mean the handle can no longer be used.
    pub fn is_closed(&self) -> bool {
        matches!(self, DatabaseError::Closed | DatabaseError::Finalized)
    }
}

impl From<tokio_rusqlite::Error> for DatabaseError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Engine(e),
            tokio_rusqlite::Error::ConnectionClosed => DatabaseError::Closed,
            tokio_rusqlite::Error::Close((_, e)) => DatabaseError::Engine(e),
            other => DatabaseError::Queue(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
