//! cadenced service internals shared by the daemon binary and its tests

mod dispatch;

pub use dispatch::*;
