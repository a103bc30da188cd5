//! IPC layer for cadenced
//!
//! Provides:
//! - Unix domain socket server
//! - NDJSON (newline-delimited JSON) protocol
//! - Per-connection event streams with disconnect cancellation
//! - Peer UID lookup

mod client;
mod server;

pub use client::*;
pub use server::*;

use cadence_api::ErrorCode;
use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The daemon answered with an error response
    #[error("Request refused ({code:?}): {message}")]
    Refused { code: ErrorCode, message: String },

    #[error("Server not started")]
    NotStarted,
}

pub type IpcResult<T> = Result<T, IpcError>;
