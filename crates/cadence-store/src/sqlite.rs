//! SQLite-based store implementation

use cadence_api::{
    EventKind, LoggedEvent, SessionInfo, SessionStatus, TaskInfo, WorkspaceInfo,
};
use cadence_util::{SessionId, TaskId, WorkspaceId};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{Store, StoreError, StoreResult, TaskUpdate, TransitionFields};

const SESSION_COLUMNS: &str =
    "id, workspace_id, goal, time_budget_minutes, focus_json, status, started_at, ended_at, summary";
const TASK_COLUMNS: &str = "id, session_id, position, title, description, category, status, notes";
const EVENT_COLUMNS: &str = "session_id, seq, kind, timestamp, payload_json";

/// SQLite-based store
///
/// A single connection behind a mutex; every multi-statement operation runs
/// inside a transaction while the lock is held, which serializes sequence
/// assignment and guarded writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                root_path TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                goal TEXT NOT NULL,
                time_budget_minutes INTEGER NOT NULL,
                focus_json TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                summary TEXT
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                notes TEXT
            );

            -- Append-only; (session_id, seq) keeps sequence numbers unique per session
            CREATE TABLE IF NOT EXISTS events (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                kind TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (session_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks(session_id, position);
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(session_id, kind);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn create_workspace(&self, workspace: &WorkspaceInfo) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO workspaces (id, name, root_path, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                workspace.workspace_id.as_str(),
                workspace.name,
                workspace.root_path.to_string_lossy(),
                workspace.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::AlreadyExists(format!("workspace {}", workspace.workspace_id))
            } else {
                e.into()
            }
        })?;

        debug!(workspace_id = %workspace.workspace_id, "Workspace created");
        Ok(())
    }

    fn get_workspace(&self, id: &WorkspaceId) -> StoreResult<WorkspaceInfo> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT id, name, root_path, created_at FROM workspaces WHERE id = ?1",
            [id.as_str()],
            |row| {
                Ok(WorkspaceInfo {
                    workspace_id: WorkspaceId::from(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    root_path: PathBuf::from(row.get::<_, String>(2)?),
                    created_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("workspace {}", id)))
    }

    fn create_session(&self, session: &SessionInfo) -> StoreResult<SessionInfo> {
        let conn = self.lock()?;
        let focus_json = serde_json::to_string(&session.focus)?;

        conn.execute(
            &format!(
                "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                session.session_id.as_str(),
                session.workspace_id.as_str(),
                session.goal,
                session.time_budget_minutes,
                focus_json,
                session.status.as_str(),
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.summary,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::AlreadyExists(format!("session {}", session.session_id))
            } else {
                e.into()
            }
        })?;

        debug!(session_id = %session.session_id, status = %session.status, "Session created");
        query_session(&conn, &session.session_id)
    }

    fn get_session(&self, id: &SessionId) -> StoreResult<SessionInfo> {
        let conn = self.lock()?;
        query_session(&conn, id)
    }

    fn transition(
        &self,
        id: &SessionId,
        from: &[SessionStatus],
        to: SessionStatus,
        fields: TransitionFields,
    ) -> StoreResult<SessionInfo> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let session = update_status(&tx, id, from, to, fields)?;
        tx.commit()?;

        Ok(session)
    }

    fn transition_with_event(
        &self,
        id: &SessionId,
        from: &[SessionStatus],
        to: SessionStatus,
        fields: TransitionFields,
        kind: EventKind,
        payload: &serde_json::Value,
    ) -> StoreResult<(SessionInfo, Option<LoggedEvent>)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let session = update_status(&tx, id, from, to, fields)?;
        let event = insert_event_once(&tx, id, kind, payload)?;
        tx.commit()?;

        Ok((session, event))
    }

    fn create_tasks(
        &self,
        session_id: &SessionId,
        tasks: &[TaskInfo],
        while_in: &[SessionStatus],
    ) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        ensure_status(&tx, session_id, while_in)?;

        for task in tasks {
            tx.execute(
                &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    task.task_id.as_str(),
                    session_id.as_str(),
                    task.position,
                    task.title,
                    task.description,
                    task.category,
                    task.status.as_str(),
                    task.notes,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::AlreadyExists(format!("task {}", task.task_id))
                } else {
                    e.into()
                }
            })?;
        }

        tx.commit()?;
        debug!(session_id = %session_id, count = tasks.len(), "Tasks created");
        Ok(())
    }

    fn get_task(&self, id: &TaskId) -> StoreResult<TaskInfo> {
        let conn = self.lock()?;
        query_task(&conn, id)
    }

    fn list_session_tasks(&self, session_id: &SessionId) -> StoreResult<Vec<TaskInfo>> {
        let conn = self.lock()?;

        // Distinguish "no tasks yet" from an unknown session
        session_status(&conn, session_id)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE session_id = ?1 ORDER BY position"
        ))?;
        let tasks = stmt
            .query_map([session_id.as_str()], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tasks)
    }

    fn update_task(
        &self,
        id: &TaskId,
        update: &TaskUpdate,
        while_in: &[SessionStatus],
    ) -> StoreResult<TaskInfo> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let task = query_task(&tx, id)?;
        ensure_status(&tx, &task.session_id, while_in)?;

        tx.execute(
            r#"
            UPDATE tasks
            SET status = COALESCE(?1, status),
                notes = COALESCE(?2, notes)
            WHERE id = ?3
            "#,
            params![
                update.status.map(|s| s.as_str()),
                update.notes,
                id.as_str(),
            ],
        )?;

        let task = query_task(&tx, id)?;
        tx.commit()?;

        debug!(task_id = %id, status = %task.status, "Task updated");
        Ok(task)
    }

    fn append_event(
        &self,
        session_id: &SessionId,
        kind: EventKind,
        payload: &serde_json::Value,
    ) -> StoreResult<LoggedEvent> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        session_status(&tx, session_id)?;
        let event = insert_event(&tx, session_id, kind, payload)?;

        tx.commit()?;
        debug!(session_id = %session_id, sequence = event.sequence, kind = %kind, "Event appended");
        Ok(event)
    }

    fn append_event_once(
        &self,
        session_id: &SessionId,
        kind: EventKind,
        payload: &serde_json::Value,
    ) -> StoreResult<Option<LoggedEvent>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        session_status(&tx, session_id)?;
        let event = insert_event_once(&tx, session_id, kind, payload)?;
        tx.commit()?;

        Ok(event)
    }

    fn events_since(&self, session_id: &SessionId, cursor: u64) -> StoreResult<Vec<LoggedEvent>> {
        let conn = self.lock()?;

        let cursor = i64::try_from(cursor).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE session_id = ?1 AND seq > ?2 ORDER BY seq"
        ))?;
        let events = stmt
            .query_map(params![session_id.as_str(), cursor], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn session_status(conn: &Connection, id: &SessionId) -> StoreResult<SessionStatus> {
    let status: String = conn
        .query_row(
            "SELECT status FROM sessions WHERE id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("session {}", id)))?;

    status
        .parse()
        .map_err(|e: cadence_api::UnknownVariant| StoreError::Serialization(e.to_string()))
}

/// Current status if it is one of `allowed`, `Conflict` otherwise
fn ensure_status(
    conn: &Connection,
    id: &SessionId,
    allowed: &[SessionStatus],
) -> StoreResult<SessionStatus> {
    let current = session_status(conn, id)?;
    if allowed.contains(&current) {
        Ok(current)
    } else {
        Err(StoreError::Conflict { current })
    }
}

/// Guarded status update; the caller commits
fn update_status(
    conn: &Connection,
    id: &SessionId,
    from: &[SessionStatus],
    to: SessionStatus,
    fields: TransitionFields,
) -> StoreResult<SessionInfo> {
    let current = ensure_status(conn, id, from)?;

    conn.execute(
        r#"
        UPDATE sessions
        SET status = ?1,
            summary = COALESCE(?2, summary),
            ended_at = COALESCE(?3, ended_at)
        WHERE id = ?4
        "#,
        params![
            to.as_str(),
            fields.summary,
            fields.ended_at.map(|t| t.to_rfc3339()),
            id.as_str(),
        ],
    )?;

    debug!(session_id = %id, from = %current, to = %to, "Session transitioned");
    query_session(conn, id)
}

fn query_session(conn: &Connection, id: &SessionId) -> StoreResult<SessionInfo> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        [id.as_str()],
        session_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("session {}", id)))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionInfo> {
    let focus_json: String = row.get(4)?;
    let status: String = row.get(5)?;
    let ended_at: Option<String> = row.get(7)?;

    Ok(SessionInfo {
        session_id: SessionId::from(row.get::<_, String>(0)?),
        workspace_id: WorkspaceId::from(row.get::<_, String>(1)?),
        goal: row.get(2)?,
        time_budget_minutes: row.get(3)?,
        focus: serde_json::from_str(&focus_json).map_err(|e| conversion_error(4, e))?,
        status: status.parse().map_err(|e| conversion_error(5, e))?,
        started_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
        ended_at: ended_at.map(|s| parse_timestamp(7, &s)).transpose()?,
        summary: row.get(8)?,
    })
}

fn query_task(conn: &Connection, id: &TaskId) -> StoreResult<TaskInfo> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        [id.as_str()],
        task_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("task {}", id)))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskInfo> {
    let status: String = row.get(6)?;

    Ok(TaskInfo {
        task_id: TaskId::from(row.get::<_, String>(0)?),
        session_id: SessionId::from(row.get::<_, String>(1)?),
        position: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        category: row.get(5)?,
        status: status.parse().map_err(|e| conversion_error(6, e))?,
        notes: row.get(7)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<LoggedEvent> {
    let sequence: i64 = row.get(1)?;
    let kind: String = row.get(2)?;
    let payload_json: String = row.get(4)?;

    Ok(LoggedEvent {
        session_id: SessionId::from(row.get::<_, String>(0)?),
        sequence: sequence as u64,
        kind: kind.parse().map_err(|e| conversion_error(2, e))?,
        timestamp: parse_timestamp(3, &row.get::<_, String>(3)?)?,
        payload: serde_json::from_str(&payload_json).map_err(|e| conversion_error(4, e))?,
    })
}

/// `insert_event` unless the session already logged an event of `kind`
fn insert_event_once(
    conn: &Connection,
    session_id: &SessionId,
    kind: EventKind,
    payload: &serde_json::Value,
) -> StoreResult<Option<LoggedEvent>> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM events WHERE session_id = ?1 AND kind = ?2)",
        params![session_id.as_str(), kind.as_str()],
        |row| row.get(0),
    )?;
    if exists {
        debug!(session_id = %session_id, kind = %kind, "Event already logged, not appending");
        return Ok(None);
    }

    let event = insert_event(conn, session_id, kind, payload)?;
    debug!(session_id = %session_id, sequence = event.sequence, kind = %kind, "Event appended");
    Ok(Some(event))
}

/// Insert at MAX(seq) + 1. Callers hold the connection lock inside a transaction.
fn insert_event(
    conn: &Connection,
    session_id: &SessionId,
    kind: EventKind,
    payload: &serde_json::Value,
) -> StoreResult<LoggedEvent> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE session_id = ?1",
        [session_id.as_str()],
        |row| row.get(0),
    )?;
    let timestamp = cadence_util::now();

    conn.execute(
        &format!("INSERT INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        params![
            session_id.as_str(),
            next,
            kind.as_str(),
            timestamp.to_rfc3339(),
            serde_json::to_string(payload)?,
        ],
    )?;

    Ok(LoggedEvent {
        session_id: session_id.clone(),
        sequence: next as u64,
        kind,
        timestamp,
        payload: payload.clone(),
    })
}
