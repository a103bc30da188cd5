//! Session orchestrator
//!
//! Validates client commands, applies them through the store's guarded
//! transitions and appends the matching events. Planning runs on the pool;
//! nothing here waits for it.

use cadence_api::{
    EventKind, FocusWeights, HealthStatus, SessionInfo, SessionStatus, SessionSummary,
    SessionView, TaskInfo, TaskStatus, WorkspaceInfo,
};
use cadence_collab::{Snapshotter, TaskGenerator};
use cadence_config::{SessionLimits, Settings, StreamSettings};
use cadence_store::{Store, TaskUpdate, TransitionFields};
use cadence_util::{SessionId, TaskId, WorkspaceId};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    summarize, CoreError, CoreResult, EventLog, EventStreamer, PlanningJob, PlanningPool,
    PlanningWorkflow, Transition, TASK_EDITABLE,
};

pub struct Orchestrator {
    store: Arc<dyn Store>,
    log: Arc<EventLog>,
    pool: PlanningPool,
    limits: SessionLimits,
    stream: StreamSettings,
}

impl Orchestrator {
    /// Build the orchestrator and start its planning workers on the current runtime
    pub fn new(
        store: Arc<dyn Store>,
        snapshotter: Arc<dyn Snapshotter>,
        generator: Arc<dyn TaskGenerator>,
        settings: &Settings,
    ) -> Self {
        let workflow = Arc::new(PlanningWorkflow::new(
            store.clone(),
            snapshotter,
            generator,
            settings.planning.clone(),
        ));
        let pool = PlanningPool::spawn(workflow, settings.planning.workers);

        Self {
            log: Arc::new(EventLog::new(store.clone())),
            store,
            pool,
            limits: settings.session,
            stream: settings.stream,
        }
    }

    pub fn event_log(&self) -> Arc<EventLog> {
        self.log.clone()
    }

    // Workspaces

    pub fn create_workspace(&self, name: &str, root_path: PathBuf) -> CoreResult<WorkspaceInfo> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("workspace name is empty".into()));
        }
        if !root_path.is_absolute() {
            return Err(CoreError::Validation(format!(
                "workspace root must be an absolute path: {}",
                root_path.display()
            )));
        }

        let workspace = WorkspaceInfo {
            workspace_id: WorkspaceId::new(),
            name: name.to_string(),
            root_path,
            created_at: cadence_util::now(),
        };
        self.store.create_workspace(&workspace)?;

        info!(
            workspace_id = %workspace.workspace_id,
            root = %workspace.root_path.display(),
            "Workspace registered"
        );
        Ok(workspace)
    }

    // Session commands

    /// Create a `planning` session and queue its planning job
    pub fn start(
        &self,
        workspace_id: &WorkspaceId,
        goal: &str,
        time_budget_minutes: u32,
        focus: FocusWeights,
    ) -> CoreResult<SessionInfo> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(CoreError::Validation("goal is empty".into()));
        }
        if !self.limits.contains(time_budget_minutes) {
            return Err(CoreError::Validation(format!(
                "time budget {} minutes is outside {}..={}",
                time_budget_minutes,
                self.limits.min_time_budget_minutes,
                self.limits.max_time_budget_minutes
            )));
        }
        if let Some((name, value)) = focus.out_of_range() {
            return Err(CoreError::Validation(format!(
                "focus weight {} = {} is outside [0, 1]",
                name, value
            )));
        }

        let workspace = self.store.get_workspace(workspace_id)?;

        let session = self.store.create_session(&SessionInfo {
            session_id: SessionId::new(),
            workspace_id: workspace.workspace_id.clone(),
            goal: goal.to_string(),
            time_budget_minutes,
            focus,
            status: SessionStatus::Planning,
            started_at: cadence_util::now(),
            ended_at: None,
            summary: None,
        })?;

        let job = PlanningJob {
            session_id: session.session_id.clone(),
            workspace_id: workspace.workspace_id,
            local_path: workspace.root_path,
            goal: session.goal.clone(),
            time_budget_minutes,
            focus,
        };

        if let Err(e) = self.pool.dispatch(job) {
            warn!(session_id = %session.session_id, error = %e, "Planning dispatch failed");
            if let Err(close) = self.cancel(&session.session_id) {
                warn!(session_id = %session.session_id, error = %close, "Failed to close undispatched session");
            }
            return Err(e);
        }

        info!(
            session_id = %session.session_id,
            workspace_id = %session.workspace_id,
            time_budget_minutes,
            "Session created, planning dispatched"
        );
        Ok(session)
    }

    /// Move the session to `cancelled` and close its log
    pub fn cancel(&self, session_id: &SessionId) -> CoreResult<SessionInfo> {
        let session = self.close_session(
            session_id,
            Transition::Cancel,
            TransitionFields {
                summary: None,
                ended_at: Some(cadence_util::now()),
            },
            json!({
                "cancelled": true,
                "status": SessionStatus::Cancelled,
            }),
        )?;

        info!(session_id = %session_id, "Session cancelled");
        Ok(session)
    }

    /// Summarize the tasks, store the summary and move the session to `completed`
    pub fn end(
        &self,
        session_id: &SessionId,
        summary_override: Option<String>,
    ) -> CoreResult<SessionSummary> {
        let session = self.store.get_session(session_id)?;
        if !Transition::End.allowed_from(session.status) {
            return Err(CoreError::Conflict {
                current: session.status,
            });
        }

        let tasks = self.store.list_session_tasks(session_id)?;
        let mut summary = summarize(&tasks);
        if let Some(text) = summary_override
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            summary.text = text;
        }

        // Guard re-checked atomically; a racing cancel surfaces as Conflict here
        self.close_session(
            session_id,
            Transition::End,
            TransitionFields {
                summary: Some(summary.text.clone()),
                ended_at: Some(cadence_util::now()),
            },
            json!({
                "cancelled": false,
                "stream_complete": true,
                "status": SessionStatus::Completed,
                "summary": summary.text,
                "completed": summary.completed,
                "skipped": summary.skipped,
                "total": summary.total,
            }),
        )?;

        info!(
            session_id = %session_id,
            completed = summary.completed,
            total = summary.total,
            "Session completed"
        );
        Ok(summary)
    }

    /// Terminal transition and its `session_ended` record, committed together
    fn close_session(
        &self,
        session_id: &SessionId,
        transition: Transition,
        fields: TransitionFields,
        payload: serde_json::Value,
    ) -> CoreResult<SessionInfo> {
        let (session, event) = self.store.transition_with_event(
            session_id,
            transition.from(),
            transition.to(),
            fields,
            EventKind::SessionEnded,
            &payload,
        )?;

        if event.is_none() {
            warn!(session_id = %session_id, "session_ended was already logged");
        }
        Ok(session)
    }

    // Tasks

    /// Edit a task of an `active` session and log the change
    pub fn update_task(
        &self,
        task_id: &TaskId,
        status: Option<TaskStatus>,
        notes: Option<String>,
    ) -> CoreResult<TaskInfo> {
        if status.is_none() && notes.is_none() {
            return Err(CoreError::Validation(
                "task update needs a status or notes".into(),
            ));
        }

        let task = self
            .store
            .update_task(task_id, &TaskUpdate { status, notes }, TASK_EDITABLE)?;

        self.log.append(
            &task.session_id,
            EventKind::TaskUpdated,
            json!({
                "task_id": task.task_id,
                "status": task.status,
                "notes": task.notes,
            }),
        )?;

        Ok(task)
    }

    pub fn list_tasks(&self, session_id: &SessionId) -> CoreResult<Vec<TaskInfo>> {
        Ok(self.store.list_session_tasks(session_id)?)
    }

    // Reads

    pub fn get_session(&self, session_id: &SessionId) -> CoreResult<SessionInfo> {
        Ok(self.store.get_session(session_id)?)
    }

    /// Session plus whether it is stuck in `planning` after a workflow error
    pub fn session_view(&self, session_id: &SessionId) -> CoreResult<SessionView> {
        let session = self.store.get_session(session_id)?;

        let planning_failed = session.status == SessionStatus::Planning
            && self
                .store
                .events_since(session_id, 0)?
                .iter()
                .any(|e| e.kind == EventKind::Error);

        Ok(SessionView {
            session,
            planning_failed,
        })
    }

    /// A streamer for an existing session
    pub fn open_stream(&self, session_id: &SessionId) -> CoreResult<EventStreamer<EventLog>> {
        self.store.get_session(session_id)?;
        Ok(EventStreamer::new(self.log.clone(), self.stream))
    }

    pub fn health(&self) -> HealthStatus {
        let store_ok = self.store.is_healthy();
        let planning_workers = self.pool.workers();
        HealthStatus {
            live: true,
            ready: store_ok && planning_workers > 0,
            store_ok,
            planning_workers,
        }
    }
}
