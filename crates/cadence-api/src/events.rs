//! Event types: the per-session log entries and the frames streamed to clients

use cadence_util::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::UnknownVariant;

/// Scan collaborator failed or timed out
pub const SCAN_FAILED: &str = "SCAN_FAILED";
/// Generation collaborator failed, timed out, or produced an invalid batch
pub const GENERATION_FAILED: &str = "GENERATION_FAILED";
/// Unexpected persistence fault inside the planning workflow
pub const PLANNING_FAILED: &str = "PLANNING_FAILED";
/// The planning workflow panicked and was caught at the worker boundary
pub const PLANNING_PANICKED: &str = "PLANNING_PANICKED";
/// Event log read failed during delivery (synthetic, never logged)
pub const POLL_ERROR: &str = "POLL_ERROR";

/// Fixed enumeration of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    ScanStarted,
    ScanProgress,
    ScanCompleted,
    PlanningStarted,
    TaskGenerated,
    PlanningCompleted,
    SessionStarted,
    TaskUpdated,
    SessionEnded,
    Error,
    Heartbeat,
    Timeout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::ScanStarted => "scan_started",
            EventKind::ScanProgress => "scan_progress",
            EventKind::ScanCompleted => "scan_completed",
            EventKind::PlanningStarted => "planning_started",
            EventKind::TaskGenerated => "task_generated",
            EventKind::PlanningCompleted => "planning_completed",
            EventKind::SessionStarted => "session_started",
            EventKind::TaskUpdated => "task_updated",
            EventKind::SessionEnded => "session_ended",
            EventKind::Error => "error",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Timeout => "timeout",
        }
    }

    /// Kinds produced by the delivery gateway itself and never written to the log
    pub fn is_synthetic(&self) -> bool {
        matches!(
            self,
            EventKind::Connected | EventKind::Heartbeat | EventKind::Timeout
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "connected" => EventKind::Connected,
            "scan_started" => EventKind::ScanStarted,
            "scan_progress" => EventKind::ScanProgress,
            "scan_completed" => EventKind::ScanCompleted,
            "planning_started" => EventKind::PlanningStarted,
            "task_generated" => EventKind::TaskGenerated,
            "planning_completed" => EventKind::PlanningCompleted,
            "session_started" => EventKind::SessionStarted,
            "task_updated" => EventKind::TaskUpdated,
            "session_ended" => EventKind::SessionEnded,
            "error" => EventKind::Error,
            "heartbeat" => EventKind::Heartbeat,
            "timeout" => EventKind::Timeout,
            other => {
                return Err(UnknownVariant {
                    kind: "event kind",
                    value: other.to_string(),
                });
            }
        };
        Ok(kind)
    }
}

/// One immutable entry of a session's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub session_id: SessionId,
    /// Dense, starting at 1 within each session
    pub sequence: u64,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// One addressable frame on an event stream: `{type, timestamp, data, seq?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    /// Log sequence number; absent on synthetic frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl StreamFrame {
    /// Frame for an entry read from the log
    pub fn from_logged(event: &LoggedEvent) -> Self {
        Self {
            kind: event.kind,
            timestamp: event.timestamp,
            data: event.payload.clone(),
            seq: Some(event.sequence),
        }
    }

    /// Frame generated by the gateway, not drawn from the log
    pub fn synthetic(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: cadence_util::now(),
            data,
            seq: None,
        }
    }

    pub fn connected(session_id: &SessionId, cursor: u64) -> Self {
        Self::synthetic(
            EventKind::Connected,
            serde_json::json!({ "session_id": session_id, "cursor": cursor }),
        )
    }

    pub fn heartbeat(cursor: u64) -> Self {
        Self::synthetic(EventKind::Heartbeat, serde_json::json!({ "cursor": cursor }))
    }

    pub fn timeout(max_duration_secs: u64) -> Self {
        Self::synthetic(
            EventKind::Timeout,
            serde_json::json!({ "max_duration_secs": max_duration_secs }),
        )
    }

    pub fn poll_error(message: impl Into<String>) -> Self {
        Self::synthetic(
            EventKind::Error,
            serde_json::json!({ "code": POLL_ERROR, "message": message.into() }),
        )
    }

    /// The stream closes after forwarding one of these
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::SessionEnded | EventKind::Timeout)
    }
}
