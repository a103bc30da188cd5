//! Mock collaborators for testing
//!
//! Both mocks can be told to fail, and can be held so that a call stays in
//! flight until the test releases it.

use async_trait::async_trait;
use cadence_util::WorkspaceId;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch, Notify};

use crate::{
    Category, CollabError, CollabResult, Evidence, GenerationRequest, Level, ScanProgress,
    Snapshot, Snapshotter, TaskGenerator, TaskProposal,
};

/// Holds callers until released
struct Gate {
    held: watch::Sender<bool>,
    entered: Notify,
}

impl Gate {
    fn new() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            held,
            entered: Notify::new(),
        }
    }

    async fn pass(&self) {
        self.entered.notify_one();
        let mut rx = self.held.subscribe();
        loop {
            let held = *rx.borrow_and_update();
            if !held || rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Mock snapshotter returning a fixed file list
pub struct MockSnapshotter {
    files: Vec<PathBuf>,
    calls: AtomicUsize,
    gate: Gate,

    /// Configure the scan to fail
    pub fail: AtomicBool,
}

impl MockSnapshotter {
    pub fn new() -> Self {
        Self::with_files(["src/main.rs", "src/lib.rs", "README.md"])
    }

    pub fn with_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            calls: AtomicUsize::new(0),
            gate: Gate::new(),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Block subsequent scans until `release` is called
    pub fn hold(&self) {
        self.gate.held.send_replace(true);
    }

    pub fn release(&self) {
        self.gate.held.send_replace(false);
    }

    /// Wait until a scan has started
    pub async fn wait_entered(&self) {
        self.gate.entered.notified().await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSnapshotter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Snapshotter for MockSnapshotter {
    async fn build_snapshot(
        &self,
        workspace_id: &WorkspaceId,
        local_path: &Path,
        progress: mpsc::UnboundedSender<ScanProgress>,
    ) -> CollabResult<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;

        if self.fail.load(Ordering::SeqCst) {
            return Err(CollabError::Io(std::io::Error::other("Mock scan failure")));
        }

        for n in 1..=self.files.len() as u64 {
            let _ = progress.send(ScanProgress { files_scanned: n });
        }

        Ok(Snapshot {
            workspace_id: workspace_id.clone(),
            root: local_path.to_path_buf(),
            file_count: self.files.len() as u64,
            total_bytes: 1024 * self.files.len() as u64,
            files: self.files.clone(),
            taken_at: cadence_util::now(),
        })
    }
}

/// Mock generator returning a fixed batch
pub struct MockGenerator {
    proposals: Mutex<Vec<TaskProposal>>,
    last_request: Mutex<Option<GenerationRequest>>,
    gate: Gate,

    /// Configure generation to fail
    pub fail: AtomicBool,

    /// Configure generation to panic
    pub panic: AtomicBool,
}

impl MockGenerator {
    /// Generator returning `count` valid proposals
    pub fn new(count: usize) -> Self {
        Self::with_proposals(
            (0..count)
                .map(|i| Self::proposal(&format!("Task {}", i + 1)))
                .collect(),
        )
    }

    pub fn with_proposals(proposals: Vec<TaskProposal>) -> Self {
        Self {
            proposals: Mutex::new(proposals),
            last_request: Mutex::new(None),
            gate: Gate::new(),
            fail: AtomicBool::new(false),
            panic: AtomicBool::new(false),
        }
    }

    /// A structurally valid proposal with two evidence citations
    pub fn proposal(title: &str) -> TaskProposal {
        TaskProposal {
            title: title.to_string(),
            description: format!("{} description", title),
            category: Category::Bug,
            impact: Level::Medium,
            effort: Level::Low,
            risk: Level::Low,
            evidence: vec![
                Evidence {
                    path: "src/main.rs".into(),
                    line: Some(1),
                    note: String::new(),
                },
                Evidence {
                    path: "src/lib.rs".into(),
                    line: None,
                    note: String::new(),
                },
            ],
        }
    }

    pub fn set_proposals(&self, proposals: Vec<TaskProposal>) {
        if let Ok(mut slot) = self.proposals.lock() {
            *slot = proposals;
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_panic(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    /// Block subsequent generations until `release` is called
    pub fn hold(&self) {
        self.gate.held.send_replace(true);
    }

    pub fn release(&self) {
        self.gate.held.send_replace(false);
    }

    /// Wait until a generation has started
    pub async fn wait_entered(&self) {
        self.gate.entered.notified().await;
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl TaskGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> CollabResult<Vec<TaskProposal>> {
        if let Ok(mut slot) = self.last_request.lock() {
            *slot = Some(request.clone());
        }
        self.gate.pass().await;

        if self.panic.load(Ordering::SeqCst) {
            panic!("Mock generator panic");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollabError::Generation("Mock generation failure".into()));
        }

        Ok(self
            .proposals
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_api::FocusWeights;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn mock_snapshot_reports_progress() {
        let snapshotter = MockSnapshotter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let snapshot = snapshotter
            .build_snapshot(&WorkspaceId::from("ws"), Path::new("/tmp/ws"), tx)
            .await
            .unwrap();

        assert_eq!(snapshot.file_count, 3);
        assert_eq!(snapshotter.calls(), 1);
        assert_eq!(rx.recv().await.unwrap().files_scanned, 1);
    }

    #[tokio::test]
    async fn mock_snapshot_failure() {
        let snapshotter = MockSnapshotter::new();
        snapshotter.set_fail(true);
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = snapshotter
            .build_snapshot(&WorkspaceId::from("ws"), Path::new("/tmp/ws"), tx)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn hold_keeps_call_in_flight() {
        let generator = Arc::new(MockGenerator::new(2));
        generator.hold();

        let request = GenerationRequest {
            snapshot: Snapshot {
                workspace_id: WorkspaceId::from("ws"),
                root: PathBuf::from("/tmp/ws"),
                file_count: 0,
                total_bytes: 0,
                files: vec![],
                taken_at: cadence_util::now(),
            },
            goal: "goal".into(),
            time_budget_minutes: 60,
            focus: FocusWeights::new(1.0, 0.0, 0.0),
        };

        let task = {
            let generator = generator.clone();
            tokio::spawn(async move { generator.generate(&request).await })
        };

        generator.wait_entered().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert_eq!(generator.last_request().unwrap().goal, "goal");

        generator.release();
        let proposals = task.await.unwrap().unwrap();
        assert_eq!(proposals.len(), 2);
    }
}
