//! Error types for the tracker data layer.
//!
//! Errors are classified by origin:
//! - `NotFound`: an operation referenced a sheet/attribute/entity id that does not exist
//! - `Validation`: a write or a restored document violates a refinement rule
//! - `Storage`: the underlying SQLite engine failed

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("backup encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

impl TrackerError {
    pub(crate) fn not_found(kind: &'static str, id: Uuid) -> Self {
        TrackerError::NotFound { kind, id }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        TrackerError::Validation(message.into())
    }

    /// Returns true if the operation referenced a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrackerError::NotFound { .. })
    }

    /// Returns true if a refinement rule rejected the write before it
    /// touched the store.
    pub fn is_validation(&self) -> bool {
        matches!(self, TrackerError::Validation(_))
    }
}
