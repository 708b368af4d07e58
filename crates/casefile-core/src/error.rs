//! Error types for casefile.

use std::fmt;

use thiserror::Error;

/// Result type alias using casefile's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for casefile operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Relational store failure not originating from sqlx
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Forbidden (authenticated but not authorized)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Relational deletion committed, but some blobs could not be removed.
    #[error("{0}")]
    ContentCleanup(ContentCleanupFailure),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// A single blob key that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedContent {
    pub evidence_uuid: uuid::Uuid,
    pub key: String,
    pub reason: String,
}

/// Aggregate of every blob deletion that failed during one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentCleanupFailure {
    pub orphaned: Vec<OrphanedContent>,
}

impl ContentCleanupFailure {
    /// The failed keys, in the order they were collected.
    pub fn keys(&self) -> Vec<&str> {
        self.orphaned.iter().map(|o| o.key.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.orphaned.is_empty()
    }
}

impl fmt::Display for ContentCleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Content cleanup incomplete: {} key(s) could not be deleted: [{}]",
            self.orphaned.len(),
            self.keys().join(", ")
        )
    }
}

impl Error {
    /// True for errors the caller can fix by changing the request.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::InvalidInput(_) | Error::Forbidden(_)
        )
    }
}
