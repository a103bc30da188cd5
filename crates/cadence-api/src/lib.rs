//! Protocol types for cadenced IPC
//!
//! This crate defines the stable API between cadenced and clients:
//! - Session, task and workspace records
//! - Logged events and stream frames
//! - Commands (requests from clients) and responses
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
