//! Planning workflow and the worker pool that runs it
//!
//! A job turns a fresh `planning` session into an `active` one with persisted
//! tasks, or leaves an `error` event behind. Every outcome is reported through
//! the event log; nothing propagates back to the code that dispatched the job.

use cadence_api::{
    EventKind, FocusWeights, SessionStatus, TaskInfo, TaskStatus, GENERATION_FAILED,
    PLANNING_FAILED, PLANNING_PANICKED, SCAN_FAILED,
};
use cadence_collab::{
    validate_proposals, GenerationRequest, ScanProgress, Snapshot, Snapshotter, TaskGenerator,
    TaskProposal,
};
use cadence_config::PlanningSettings;
use cadence_store::{Store, StoreError, TransitionFields};
use cadence_util::{SessionId, TaskId, WorkspaceId};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::{CoreError, EventLog, Transition};

/// Work item sent to the planning pool
#[derive(Debug, Clone)]
pub struct PlanningJob {
    pub session_id: SessionId,
    pub workspace_id: WorkspaceId,
    pub local_path: PathBuf,
    pub goal: String,
    pub time_budget_minutes: u32,
    pub focus: FocusWeights,
}

/// How a planning job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningOutcome {
    /// Tasks persisted and the session moved to `active`
    Activated { task_count: usize },
    /// The session left `planning` through a client command first
    Aborted { status: SessionStatus },
    /// An `error` event with this code was logged
    Failed { code: &'static str },
}

/// A step failure, recorded as an `error` event
#[derive(Debug)]
struct StepFailure {
    code: &'static str,
    stage: &'static str,
    message: String,
}

impl StepFailure {
    fn new(code: &'static str, stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            message: message.into(),
        }
    }

    fn persistence(stage: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(PLANNING_FAILED, stage, e.to_string())
    }
}

/// Steps of the planning workflow
pub struct PlanningWorkflow {
    store: Arc<dyn Store>,
    log: EventLog,
    snapshotter: Arc<dyn Snapshotter>,
    generator: Arc<dyn TaskGenerator>,
    settings: PlanningSettings,
}

impl PlanningWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        snapshotter: Arc<dyn Snapshotter>,
        generator: Arc<dyn TaskGenerator>,
        settings: PlanningSettings,
    ) -> Self {
        Self {
            log: EventLog::new(store.clone()),
            store,
            snapshotter,
            generator,
            settings,
        }
    }

    /// Run every step for one job
    pub async fn run(&self, job: &PlanningJob) -> PlanningOutcome {
        match self.execute(job).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(
                    session_id = %job.session_id,
                    code = failure.code,
                    stage = failure.stage,
                    error = %failure.message,
                    "Planning failed"
                );
                self.record_failure(&job.session_id, &failure);
                PlanningOutcome::Failed { code: failure.code }
            }
        }
    }

    async fn execute(&self, job: &PlanningJob) -> Result<PlanningOutcome, StepFailure> {
        let sid = &job.session_id;

        // Cancelled or ended before a worker picked the job up
        let session = self
            .store
            .get_session(sid)
            .map_err(|e| StepFailure::persistence("dispatch", e))?;
        if session.status != SessionStatus::Planning {
            return self.abort(sid, session.status);
        }

        let snapshot = self.scan(job).await?;

        self.append(
            sid,
            EventKind::PlanningStarted,
            json!({
                "goal": job.goal,
                "time_budget_minutes": job.time_budget_minutes,
                "focus": job.focus,
            }),
            "planning",
        )?;

        let proposals = self.generate(job, snapshot).await?;

        for (position, proposal) in proposals.iter().enumerate() {
            let task = task_from_proposal(sid, position as u32, proposal);

            match self.store.create_tasks(
                sid,
                std::slice::from_ref(&task),
                &[SessionStatus::Planning],
            ) {
                Ok(()) => {}
                Err(StoreError::Conflict { current }) => return self.abort(sid, current),
                Err(e) => return Err(StepFailure::persistence("persist", e)),
            }

            self.append(
                sid,
                EventKind::TaskGenerated,
                json!({
                    "task_id": task.task_id,
                    "position": task.position,
                    "title": proposal.title,
                    "description": proposal.description,
                    "category": proposal.category,
                    "impact": proposal.impact,
                    "effort": proposal.effort,
                    "risk": proposal.risk,
                    "evidence": proposal.evidence,
                }),
                "persist",
            )?;
        }

        let task_count = proposals.len();

        match self.store.transition(
            sid,
            Transition::Activate.from(),
            Transition::Activate.to(),
            TransitionFields::default(),
        ) {
            Ok(_) => {}
            Err(StoreError::Conflict { current }) => return self.abort(sid, current),
            Err(e) => return Err(StepFailure::persistence("activate", e)),
        }

        self.append(
            sid,
            EventKind::PlanningCompleted,
            json!({ "task_count": task_count }),
            "activate",
        )?;
        self.append(
            sid,
            EventKind::SessionStarted,
            json!({ "status": SessionStatus::Active, "task_count": task_count }),
            "activate",
        )?;

        info!(session_id = %sid, task_count, "Planning completed, session active");
        Ok(PlanningOutcome::Activated { task_count })
    }

    async fn scan(&self, job: &PlanningJob) -> Result<Snapshot, StepFailure> {
        let sid = &job.session_id;

        self.append(
            sid,
            EventKind::ScanStarted,
            json!({
                "workspace_id": job.workspace_id,
                "root": job.local_path,
            }),
            "scan",
        )?;

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ScanProgress>();
        let scan = tokio::time::timeout(
            self.settings.scan_timeout,
            self.snapshotter
                .build_snapshot(&job.workspace_id, &job.local_path, progress_tx),
        );
        tokio::pin!(scan);

        let result = loop {
            tokio::select! {
                result = &mut scan => break result,
                Some(progress) = progress_rx.recv() => {
                    self.append_progress(sid, progress)?;
                }
            }
        };

        // Reports queued while the scan was finishing
        while let Ok(progress) = progress_rx.try_recv() {
            self.append_progress(sid, progress)?;
        }

        let snapshot = match result {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return Err(StepFailure::new(SCAN_FAILED, "scan", e.to_string())),
            Err(_) => {
                return Err(StepFailure::new(
                    SCAN_FAILED,
                    "scan",
                    format!(
                        "scan timed out after {}s",
                        self.settings.scan_timeout.as_secs()
                    ),
                ));
            }
        };

        self.append(sid, EventKind::ScanCompleted, snapshot.summary(), "scan")?;
        debug!(session_id = %sid, file_count = snapshot.file_count, "Scan completed");
        Ok(snapshot)
    }

    async fn generate(
        &self,
        job: &PlanningJob,
        snapshot: Snapshot,
    ) -> Result<Vec<TaskProposal>, StepFailure> {
        let request = GenerationRequest {
            snapshot,
            goal: job.goal.clone(),
            time_budget_minutes: job.time_budget_minutes,
            focus: job.focus,
        };

        let proposals = match tokio::time::timeout(
            self.settings.generation_timeout,
            self.generator.generate(&request),
        )
        .await
        {
            Ok(Ok(proposals)) => proposals,
            Ok(Err(e)) => {
                return Err(StepFailure::new(GENERATION_FAILED, "generate", e.to_string()));
            }
            Err(_) => {
                return Err(StepFailure::new(
                    GENERATION_FAILED,
                    "generate",
                    format!(
                        "generation timed out after {}s",
                        self.settings.generation_timeout.as_secs()
                    ),
                ));
            }
        };

        validate_proposals(&proposals, self.settings.min_evidence, self.settings.max_tasks)
            .map_err(|e| StepFailure::new(GENERATION_FAILED, "validate", e.to_string()))?;

        Ok(proposals)
    }

    /// The session already left `planning`. Client commands log their own
    /// `session_ended`; only a cancellation lacking one is closed out here.
    fn abort(
        &self,
        sid: &SessionId,
        status: SessionStatus,
    ) -> Result<PlanningOutcome, StepFailure> {
        info!(session_id = %sid, status = %status, "Planning aborted");

        if status == SessionStatus::Cancelled {
            self.log
                .append_terminal(
                    sid,
                    json!({
                        "cancelled": true,
                        "status": status,
                        "planning_aborted": true,
                    }),
                )
                .map_err(|e| StepFailure::persistence("abort", e))?;
        }

        Ok(PlanningOutcome::Aborted { status })
    }

    fn append(
        &self,
        sid: &SessionId,
        kind: EventKind,
        payload: serde_json::Value,
        stage: &'static str,
    ) -> Result<u64, StepFailure> {
        self.log
            .append(sid, kind, payload)
            .map_err(|e| StepFailure::persistence(stage, e))
    }

    fn append_progress(&self, sid: &SessionId, progress: ScanProgress) -> Result<u64, StepFailure> {
        self.append(
            sid,
            EventKind::ScanProgress,
            json!({ "files_scanned": progress.files_scanned }),
            "scan",
        )
    }

    fn record_failure(&self, sid: &SessionId, failure: &StepFailure) {
        let payload = json!({
            "code": failure.code,
            "stage": failure.stage,
            "message": failure.message,
        });
        if let Err(e) = self.log.append(sid, EventKind::Error, payload) {
            warn!(session_id = %sid, error = %e, "Failed to record planning error");
        }
    }
}

fn task_from_proposal(session_id: &SessionId, position: u32, proposal: &TaskProposal) -> TaskInfo {
    TaskInfo {
        task_id: TaskId::new(),
        session_id: session_id.clone(),
        position,
        title: proposal.title.clone(),
        description: proposal.description.clone(),
        category: proposal.category.as_str().to_string(),
        status: TaskStatus::Pending,
        notes: None,
    }
}

/// Fixed set of workers pulling planning jobs from a shared queue.
///
/// Each job runs in its own task so a panic is caught at the worker and
/// turned into a `PLANNING_PANICKED` error event.
pub struct PlanningPool {
    tx: mpsc::UnboundedSender<PlanningJob>,
    workers: usize,
}

impl PlanningPool {
    /// Start `workers` workers on the current runtime
    pub fn spawn(workflow: Arc<PlanningWorkflow>, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers {
            tokio::spawn(worker_loop(worker, workflow.clone(), rx.clone()));
        }
        info!(workers, "Planning pool started");

        Self { tx, workers }
    }

    /// Queue a job; never waits for it to run
    pub fn dispatch(&self, job: PlanningJob) -> Result<(), CoreError> {
        self.tx
            .send(job)
            .map_err(|_| CoreError::Internal("planning pool is not running".into()))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

async fn worker_loop(
    worker: usize,
    workflow: Arc<PlanningWorkflow>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<PlanningJob>>>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            debug!(worker, "Planning queue closed, worker exiting");
            break;
        };

        let session_id = job.session_id.clone();
        debug!(worker, session_id = %session_id, "Planning job started");

        let run = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.run(&job).await })
        };

        match run.await {
            Ok(outcome) => {
                debug!(worker, session_id = %session_id, ?outcome, "Planning job finished");
            }
            Err(e) if e.is_panic() => {
                warn!(worker, session_id = %session_id, "Planning workflow panicked");
                workflow.record_failure(
                    &session_id,
                    &StepFailure::new(PLANNING_PANICKED, "worker", "planning workflow panicked"),
                );
            }
            Err(e) => {
                warn!(worker, session_id = %session_id, error = %e, "Planning job aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_api::{LoggedEvent, SessionInfo, WorkspaceInfo};
    use cadence_collab::{MockGenerator, MockSnapshotter};
    use cadence_store::SqliteStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<SqliteStore>,
        snapshotter: Arc<MockSnapshotter>,
        generator: Arc<MockGenerator>,
        workflow: PlanningWorkflow,
    }

    fn fixture(settings: PlanningSettings) -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let snapshotter = Arc::new(MockSnapshotter::new());
        let generator = Arc::new(MockGenerator::new(3));
        let workflow = PlanningWorkflow::new(
            store.clone(),
            snapshotter.clone(),
            generator.clone(),
            settings,
        );
        Fixture {
            store,
            snapshotter,
            generator,
            workflow,
        }
    }

    fn job(store: &SqliteStore) -> PlanningJob {
        let workspace = WorkspaceInfo {
            workspace_id: WorkspaceId::new(),
            name: "demo".into(),
            root_path: PathBuf::from("/tmp/demo"),
            created_at: cadence_util::now(),
        };
        store.create_workspace(&workspace).unwrap();

        let session = SessionInfo {
            session_id: SessionId::new(),
            workspace_id: workspace.workspace_id.clone(),
            goal: "fix bug".into(),
            time_budget_minutes: 60,
            focus: FocusWeights::new(1.0, 0.0, 0.0),
            status: SessionStatus::Planning,
            started_at: cadence_util::now(),
            ended_at: None,
            summary: None,
        };
        store.create_session(&session).unwrap();

        PlanningJob {
            session_id: session.session_id,
            workspace_id: workspace.workspace_id,
            local_path: workspace.root_path,
            goal: session.goal,
            time_budget_minutes: session.time_budget_minutes,
            focus: session.focus,
        }
    }

    fn kinds(events: &[LoggedEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn successful_run_activates_session() {
        let f = fixture(PlanningSettings::default());
        let job = job(&f.store);

        let outcome = f.workflow.run(&job).await;
        assert_eq!(outcome, PlanningOutcome::Activated { task_count: 3 });

        let session = f.store.get_session(&job.session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(f.store.list_session_tasks(&job.session_id).unwrap().len(), 3);

        let events = f.store.events_since(&job.session_id, 0).unwrap();
        let kinds: Vec<EventKind> = kinds(&events)
            .into_iter()
            .filter(|k| *k != EventKind::ScanProgress)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ScanStarted,
                EventKind::ScanCompleted,
                EventKind::PlanningStarted,
                EventKind::TaskGenerated,
                EventKind::TaskGenerated,
                EventKind::TaskGenerated,
                EventKind::PlanningCompleted,
                EventKind::SessionStarted,
            ]
        );

        // Progress reports land between scan_started and scan_completed
        let progress: Vec<u64> = events
            .iter()
            .filter(|e| e.kind == EventKind::ScanProgress)
            .map(|e| e.sequence)
            .collect();
        assert_eq!(progress, vec![2, 3, 4]);

        let request = f.generator.last_request().unwrap();
        assert_eq!(request.goal, "fix bug");
        assert_eq!(request.time_budget_minutes, 60);
    }

    #[tokio::test]
    async fn scan_failure_leaves_session_planning() {
        let f = fixture(PlanningSettings::default());
        f.snapshotter.set_fail(true);
        let job = job(&f.store);

        let outcome = f.workflow.run(&job).await;
        assert_eq!(outcome, PlanningOutcome::Failed { code: SCAN_FAILED });

        let session = f.store.get_session(&job.session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Planning);

        let events = f.store.events_since(&job.session_id, 0).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::ScanStarted, EventKind::Error]);
        assert_eq!(events[1].payload["code"], SCAN_FAILED);
    }

    #[tokio::test]
    async fn invalid_batch_is_generation_failure() {
        let f = fixture(PlanningSettings::default());
        let mut thin = MockGenerator::proposal("Thin");
        thin.evidence.truncate(1);
        f.generator.set_proposals(vec![thin]);
        let job = job(&f.store);

        let outcome = f.workflow.run(&job).await;
        assert_eq!(outcome, PlanningOutcome::Failed { code: GENERATION_FAILED });
        assert!(f.store.list_session_tasks(&job.session_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn generator_error_is_generation_failure() {
        let f = fixture(PlanningSettings::default());
        f.generator.set_fail(true);
        let job = job(&f.store);

        let outcome = f.workflow.run(&job).await;
        assert_eq!(outcome, PlanningOutcome::Failed { code: GENERATION_FAILED });

        let events = f.store.events_since(&job.session_id, 0).unwrap();
        assert_eq!(events.last().unwrap().kind, EventKind::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generator_times_out() {
        let settings = PlanningSettings {
            generation_timeout: Duration::from_secs(5),
            ..PlanningSettings::default()
        };
        let f = fixture(settings);
        f.generator.hold();
        let job = job(&f.store);

        let outcome = f.workflow.run(&job).await;
        assert_eq!(outcome, PlanningOutcome::Failed { code: GENERATION_FAILED });

        let events = f.store.events_since(&job.session_id, 0).unwrap();
        let error = events.last().unwrap();
        assert!(error.payload["message"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancel_during_generation_discards_plan() {
        let f = Arc::new(fixture(PlanningSettings::default()));
        f.generator.hold();
        let job = job(&f.store);

        let run = {
            let f = f.clone();
            let job = job.clone();
            tokio::spawn(async move { f.workflow.run(&job).await })
        };

        f.generator.wait_entered().await;
        f.store
            .transition(
                &job.session_id,
                Transition::Cancel.from(),
                SessionStatus::Cancelled,
                TransitionFields::default(),
            )
            .unwrap();
        f.generator.release();

        let outcome = run.await.unwrap();
        assert_eq!(
            outcome,
            PlanningOutcome::Aborted {
                status: SessionStatus::Cancelled
            }
        );
        assert!(f.store.list_session_tasks(&job.session_id).unwrap().is_empty());

        let events = f.store.events_since(&job.session_id, 0).unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::SessionEnded);
        assert_eq!(last.payload["cancelled"], true);
        assert!(!kinds(&events).contains(&EventKind::PlanningCompleted));
    }

    #[tokio::test]
    async fn job_for_terminal_session_is_skipped() {
        let f = fixture(PlanningSettings::default());
        let job = job(&f.store);
        f.store
            .transition(
                &job.session_id,
                Transition::End.from(),
                SessionStatus::Completed,
                TransitionFields::default(),
            )
            .unwrap();

        let outcome = f.workflow.run(&job).await;
        assert_eq!(
            outcome,
            PlanningOutcome::Aborted {
                status: SessionStatus::Completed
            }
        );
        assert_eq!(f.snapshotter.calls(), 0);

        // Only `end` writes a completed session's session_ended
        assert!(f.store.events_since(&job.session_id, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn pool_turns_panic_into_error_event() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let generator = Arc::new(MockGenerator::new(1));
        generator.set_panic(true);
        let workflow = Arc::new(PlanningWorkflow::new(
            store.clone(),
            Arc::new(MockSnapshotter::new()),
            generator,
            PlanningSettings::default(),
        ));
        let pool = PlanningPool::spawn(workflow, 1);
        let job = job(&store);
        pool.dispatch(job.clone()).unwrap();

        let mut error = None;
        for _ in 0..100 {
            let events = store.events_since(&job.session_id, 0).unwrap();
            if let Some(e) = events.iter().find(|e| e.kind == EventKind::Error) {
                error = Some(e.clone());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let error = error.expect("panic recorded as error event");
        assert_eq!(error.payload["code"], PLANNING_PANICKED);
        assert_eq!(
            store.get_session(&job.session_id).unwrap().status,
            SessionStatus::Planning
        );
    }
}
