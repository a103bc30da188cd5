//! Core session lifecycle for cadenced
//!
//! - Event log facade with gapless per-session sequence numbers
//! - Session state machine (planning -> active -> completed | cancelled)
//! - Planning workflow and its worker pool
//! - Session orchestrator for client commands
//! - Event delivery gateway (poll, heartbeat, max duration, cancellation)

mod delivery;
mod error;
mod log;
mod orchestrator;
mod planning;
mod session;

pub use delivery::*;
pub use error::*;
pub use log::*;
pub use orchestrator::*;
pub use planning::*;
pub use session::*;
