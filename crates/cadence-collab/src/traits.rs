//! Collaborator traits

use async_trait::async_trait;
use cadence_api::FocusWeights;
use cadence_util::WorkspaceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{ProposalError, TaskProposal};

/// Errors from collaborator calls
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Invalid proposals: {0}")]
    InvalidProposals(#[from] ProposalError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CollabResult<T> = Result<T, CollabError>;

/// Progress report sent by a snapshotter while it scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub files_scanned: u64,
}

/// What a snapshotter learned about a workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub workspace_id: WorkspaceId,
    pub root: PathBuf,
    pub file_count: u64,
    pub total_bytes: u64,
    /// Bounded sample of file paths, relative to `root`
    pub files: Vec<PathBuf>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Payload for the `scan_completed` event
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "file_count": self.file_count,
            "total_bytes": self.total_bytes,
            "sampled_files": self.files.len(),
        })
    }
}

/// Input to a task generator
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub snapshot: Snapshot,
    pub goal: String,
    pub time_budget_minutes: u32,
    pub focus: FocusWeights,
}

/// Builds a project snapshot from a workspace on disk
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// Scan `local_path`. Progress reports are best effort; a closed
    /// receiver must not fail the scan.
    async fn build_snapshot(
        &self,
        workspace_id: &WorkspaceId,
        local_path: &Path,
        progress: mpsc::UnboundedSender<ScanProgress>,
    ) -> CollabResult<Snapshot>;
}

/// Produces task proposals for a session
#[async_trait]
pub trait TaskGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> CollabResult<Vec<TaskProposal>>;
}
