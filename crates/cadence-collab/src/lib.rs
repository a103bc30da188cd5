//! Collaborator interfaces for cadenced
//!
//! The planning workflow consumes two collaborators through narrow traits:
//! a snapshot builder that inspects a workspace on disk, and a task generator
//! that turns a snapshot plus the session goal into task proposals. Generator
//! output is checked structurally before it is accepted.

mod http;
mod mock;
mod proposal;
mod snapshot;
mod template;
mod traits;

pub use http::*;
pub use mock::*;
pub use proposal::*;
pub use snapshot::*;
pub use template::*;
pub use traits::*;
