//! Shared utilities for cadence
//!
//! This crate provides:
//! - ID types (SessionId, TaskId, WorkspaceId, ClientId)
//! - Wall-clock time helper
//! - Default paths for socket, data, and config files

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
