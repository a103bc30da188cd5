//! Persistence layer for cadenced
//!
//! Provides:
//! - Workspace, session and task records
//! - Guarded status transitions (the only session mutator)
//! - Per-session append-only event log with dense sequence numbers

mod sqlite;
mod traits;

pub use sqlite::*;
pub use traits::*;

use cadence_api::SessionStatus;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A guarded write found the session in a status it does not allow
    #[error("Session is {current}")]
    Conflict { current: SessionStatus },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
