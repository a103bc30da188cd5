//! Time utilities for cadence
//!
//! All persisted and wire timestamps are UTC.

use chrono::{DateTime, Utc};

/// Current wall-clock time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
