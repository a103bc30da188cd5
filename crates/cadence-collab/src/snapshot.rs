//! Directory-walking snapshotter

use async_trait::async_trait;
use cadence_util::WorkspaceId;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::{CollabError, CollabResult, ScanProgress, Snapshot, Snapshotter};

const DEFAULT_SAMPLE_LIMIT: usize = 200;
const DEFAULT_PROGRESS_EVERY: u64 = 500;
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

/// Walks a workspace root on a blocking thread, counting files and bytes
#[derive(Debug, Clone)]
pub struct DirSnapshotter {
    sample_limit: usize,
    progress_every: u64,
}

impl DirSnapshotter {
    pub fn new() -> Self {
        Self {
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }

    /// Keep at most `limit` file paths in the snapshot
    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Report progress after every `n` files
    pub fn with_progress_every(mut self, n: u64) -> Self {
        self.progress_every = n.max(1);
        self
    }
}

impl Default for DirSnapshotter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Snapshotter for DirSnapshotter {
    async fn build_snapshot(
        &self,
        workspace_id: &WorkspaceId,
        local_path: &Path,
        progress: mpsc::UnboundedSender<ScanProgress>,
    ) -> CollabResult<Snapshot> {
        let workspace_id = workspace_id.clone();
        let root = local_path.to_path_buf();
        let this = self.clone();

        tokio::task::spawn_blocking(move || this.scan(workspace_id, root, progress))
            .await
            .map_err(|e| CollabError::Internal(format!("scan task failed: {}", e)))?
    }
}

impl DirSnapshotter {
    fn scan(
        &self,
        workspace_id: WorkspaceId,
        root: PathBuf,
        progress: mpsc::UnboundedSender<ScanProgress>,
    ) -> CollabResult<Snapshot> {
        let meta = std::fs::metadata(&root)?;
        if !meta.is_dir() {
            return Err(CollabError::InvalidInput(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut file_count = 0u64;
        let mut total_bytes = 0u64;
        let mut files = Vec::new();

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            file_count += 1;
            total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);

            if files.len() < self.sample_limit {
                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                files.push(relative.to_path_buf());
            }

            if file_count % self.progress_every == 0 {
                let _ = progress.send(ScanProgress {
                    files_scanned: file_count,
                });
            }
        }

        debug!(root = %root.display(), file_count, total_bytes, "Workspace scanned");

        Ok(Snapshot {
            workspace_id,
            root,
            file_count,
            total_bytes,
            files,
            taken_at: cadence_util::now(),
        })
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.') || SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn counts_files_and_skips_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "src/lib.rs", "");
        write(dir.path(), "README.md", "hello");
        write(dir.path(), ".git/config", "ignored");
        write(dir.path(), "target/debug/app", "ignored");
        write(dir.path(), "web/node_modules/x/index.js", "ignored");

        let (tx, _rx) = mpsc::unbounded_channel();
        let snapshot = DirSnapshotter::new()
            .build_snapshot(&WorkspaceId::from("ws"), dir.path(), tx)
            .await
            .unwrap();

        assert_eq!(snapshot.file_count, 3);
        assert_eq!(snapshot.total_bytes, 17);
        assert!(snapshot.files.contains(&PathBuf::from("src/main.rs")));
        assert!(snapshot.files.iter().all(|p| p.is_relative()));
    }

    #[tokio::test]
    async fn reports_progress_and_bounds_sample() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            write(dir.path(), &format!("f{}.txt", i), "x");
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let snapshot = DirSnapshotter::new()
            .with_sample_limit(4)
            .with_progress_every(5)
            .build_snapshot(&WorkspaceId::from("ws"), dir.path(), tx)
            .await
            .unwrap();

        assert_eq!(snapshot.files.len(), 4);
        assert_eq!(rx.recv().await.unwrap().files_scanned, 5);
        assert_eq!(rx.recv().await.unwrap().files_scanned, 10);
    }

    #[tokio::test]
    async fn missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = DirSnapshotter::new()
            .build_snapshot(&WorkspaceId::from("ws"), &dir.path().join("absent"), tx)
            .await;

        assert!(matches!(result, Err(CollabError::Io(_))));
    }
}
