//! Store trait definitions

use cadence_api::{EventKind, LoggedEvent, SessionInfo, SessionStatus, TaskInfo, TaskStatus, WorkspaceInfo};
use cadence_util::{SessionId, TaskId, WorkspaceId};
use chrono::{DateTime, Utc};

use crate::StoreResult;

/// Fields written alongside a status change. `None` leaves the stored value as is.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub summary: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Partial task edit. `None` leaves the stored value as is.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub notes: Option<String>,
}

/// Main store trait
///
/// Every lookup of an absent identifier fails with `StoreError::NotFound`.
/// Guarded writes check the owning session's status and the write in one
/// atomic step, failing with `StoreError::Conflict` naming the current status.
pub trait Store: Send + Sync {
    // Workspaces

    fn create_workspace(&self, workspace: &WorkspaceInfo) -> StoreResult<()>;

    fn get_workspace(&self, id: &WorkspaceId) -> StoreResult<WorkspaceInfo>;

    // Sessions

    /// Insert a new session; `AlreadyExists` on id collision
    fn create_session(&self, session: &SessionInfo) -> StoreResult<SessionInfo>;

    fn get_session(&self, id: &SessionId) -> StoreResult<SessionInfo>;

    /// Move a session to `to` if its current status is one of `from`
    fn transition(
        &self,
        id: &SessionId,
        from: &[SessionStatus],
        to: SessionStatus,
        fields: TransitionFields,
    ) -> StoreResult<SessionInfo>;

    /// `transition` plus an append of `kind` unless the session's log already
    /// holds one, committed together. On `Conflict` neither is written.
    fn transition_with_event(
        &self,
        id: &SessionId,
        from: &[SessionStatus],
        to: SessionStatus,
        fields: TransitionFields,
        kind: EventKind,
        payload: &serde_json::Value,
    ) -> StoreResult<(SessionInfo, Option<LoggedEvent>)>;

    // Tasks

    /// Insert tasks for a session whose status is one of `while_in`
    fn create_tasks(
        &self,
        session_id: &SessionId,
        tasks: &[TaskInfo],
        while_in: &[SessionStatus],
    ) -> StoreResult<()>;

    fn get_task(&self, id: &TaskId) -> StoreResult<TaskInfo>;

    /// Tasks of a session in plan order
    fn list_session_tasks(&self, session_id: &SessionId) -> StoreResult<Vec<TaskInfo>>;

    /// Edit a task whose session status is one of `while_in`
    fn update_task(
        &self,
        id: &TaskId,
        update: &TaskUpdate,
        while_in: &[SessionStatus],
    ) -> StoreResult<TaskInfo>;

    // Event log

    /// Append an event, assigning the next sequence number for the session
    fn append_event(
        &self,
        session_id: &SessionId,
        kind: EventKind,
        payload: &serde_json::Value,
    ) -> StoreResult<LoggedEvent>;

    /// Append an event unless the session's log already holds one of the same kind.
    /// Returns `None` when nothing was appended.
    fn append_event_once(
        &self,
        session_id: &SessionId,
        kind: EventKind,
        payload: &serde_json::Value,
    ) -> StoreResult<Option<LoggedEvent>>;

    /// Events with a sequence number strictly greater than `cursor`, ascending
    fn events_since(&self, session_id: &SessionId, cursor: u64) -> StoreResult<Vec<LoggedEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
