//! Event Log facade over the store
//!
//! Sequence assignment happens inside the store while it holds its lock, so
//! concurrent appends for one session never share or skip a number.

use cadence_api::{EventKind, LoggedEvent};
use cadence_store::Store;
use cadence_util::SessionId;
use std::sync::Arc;
use tracing::debug;

use crate::{CoreError, CoreResult};

/// Anything the delivery gateway can poll from a cursor
pub trait EventSource: Send + Sync {
    /// Events with a sequence number above `cursor`, ascending, and the
    /// highest sequence number seen (`cursor` itself when there are none)
    fn read_since(&self, session_id: &SessionId, cursor: u64)
        -> CoreResult<(Vec<LoggedEvent>, u64)>;
}

/// Append-only, per-session event log
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn Store>,
}

impl EventLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append an event and return its sequence number.
    ///
    /// Synthetic kinds belong to the delivery gateway and are refused.
    pub fn append(
        &self,
        session_id: &SessionId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> CoreResult<u64> {
        if kind.is_synthetic() {
            return Err(CoreError::Internal(format!(
                "{} events are not logged",
                kind
            )));
        }

        let event = self.store.append_event(session_id, kind, &payload)?;
        Ok(event.sequence)
    }

    /// Append `session_ended` unless the session's log already holds one.
    /// Returns the sequence number when this call wrote it.
    pub fn append_terminal(
        &self,
        session_id: &SessionId,
        payload: serde_json::Value,
    ) -> CoreResult<Option<u64>> {
        let event = self
            .store
            .append_event_once(session_id, EventKind::SessionEnded, &payload)?;

        if event.is_none() {
            debug!(session_id = %session_id, "session_ended already logged");
        }
        Ok(event.map(|e| e.sequence))
    }

    pub fn read_since(
        &self,
        session_id: &SessionId,
        cursor: u64,
    ) -> CoreResult<(Vec<LoggedEvent>, u64)> {
        let events = self
            .store
            .events_since(session_id, cursor)
            .map_err(|e| CoreError::Poll(e.to_string()))?;
        let new_cursor = events.last().map(|e| e.sequence).unwrap_or(cursor);
        Ok((events, new_cursor))
    }
}

impl EventSource for EventLog {
    fn read_since(
        &self,
        session_id: &SessionId,
        cursor: u64,
    ) -> CoreResult<(Vec<LoggedEvent>, u64)> {
        EventLog::read_since(self, session_id, cursor)
    }
}
