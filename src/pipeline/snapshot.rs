//! Workflow state snapshot.
//!
//! After every state change the run's view is written to a single JSON
//! document that external tooling polls. There is one slot per deployment:
//! concurrent runs overwrite each other and the last write wins.
//!
//! Writes are synchronous and happen while the caller holds the run's
//! record lock, which keeps one run's documents in order. On a
//! multi-threaded tokio runtime `persist` moves the file I/O off the
//! async worker with `block_in_place`; on a current-thread runtime it
//! writes inline.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

use crate::error::SnapshotError;

use super::detector::WorkflowType;
use super::record::{WorkflowRun, WorkflowStatus};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Extra fields carried in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub workflow_type: WorkflowType,
}

/// The document written to `workflow_state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStateDocument {
    pub workflow_id: String,
    pub project_name: Option<String>,
    /// Always null; kept for readers that expect the field.
    pub feature_name: Option<String>,
    pub status: WorkflowStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub final_score: Option<f64>,
    pub current_agent: Option<String>,
    pub completed_agents: Vec<String>,
    pub pending_agents: Vec<String>,
    pub loop_counts: BTreeMap<String, u32>,
    pub max_loops: u32,
    pub quality_scores: BTreeMap<String, serde_json::Value>,
    pub human_review_required: bool,
    pub escalation_reason: Option<String>,
    pub error: Option<String>,
    pub metadata: SnapshotMetadata,
}

impl WorkflowStateDocument {
    /// Builds the document for a run.
    pub fn from_run(run: &WorkflowRun, max_loops: u32) -> Self {
        let escalation_reason = if run.status == WorkflowStatus::Failed {
            run.error.clone()
        } else {
            None
        };

        Self {
            workflow_id: run.workflow_id.clone(),
            project_name: run.project_name.clone(),
            feature_name: None,
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            final_score: run.final_score,
            current_agent: run.current_agent.clone(),
            completed_agents: run.completed_agents.clone(),
            pending_agents: run.pending_agents.clone(),
            loop_counts: run.loop_counts.clone(),
            max_loops,
            quality_scores: run.quality_scores.clone(),
            human_review_required: run.human_review_required,
            escalation_reason,
            error: run.error.clone(),
            metadata: SnapshotMetadata {
                workflow_type: run.workflow_type,
            },
        }
    }
}

/// Writes the workflow state document.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
    max_loops: u32,
    /// Successful writes, shared by all clones.
    writes: Arc<AtomicU64>,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>, max_loops: u32) -> Self {
        Self {
            path: path.into(),
            max_loops,
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Location of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of documents written by this writer and its clones.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Serializes `run` and replaces the document atomically.
    ///
    /// The JSON goes to a sibling temp file first and is then renamed over
    /// the target, so readers see either the old or the new document.
    pub fn write(&self, run: &WorkflowRun) -> Result<PathBuf, SnapshotError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let document = WorkflowStateDocument::from_run(run, self.max_loops);
        let contents = serde_json::to_string_pretty(&document)?;

        let tmp = self.temp_path();
        if let Err(e) = fs::write(&tmp, contents).and_then(|_| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        self.writes.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Wrote workflow state for {} ({}) to {}",
            run.workflow_id,
            run.status,
            self.path.display()
        );
        Ok(self.path.clone())
    }

    /// Best-effort write: failures are logged, never returned.
    pub fn persist(&self, run: &WorkflowRun) {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.persist_inline(run))
            }
            _ => self.persist_inline(run),
        }
    }

    /// Like `persist`, but always writes on the calling thread. Safe from
    /// `Drop` impls, which may run while the runtime shuts down.
    pub(crate) fn persist_inline(&self, run: &WorkflowRun) {
        if let Err(e) = self.write(run) {
            warn!(
                "Failed to write workflow state for {} to {}: {}",
                run.workflow_id,
                self.path.display(),
                e
            );
        }
    }

    /// Reads the current document.
    pub fn read(&self) -> Result<WorkflowStateDocument, SnapshotError> {
        read_document(&self.path)
    }

    fn temp_path(&self) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "workflow_state.json".to_string());
        self.path
            .with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), n))
    }
}

/// Reads a workflow state document from `path`.
pub fn read_document(path: &Path) -> Result<WorkflowStateDocument, SnapshotError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::record::default_stages;
    use serde_json::json;
    use tempfile::TempDir;

    fn run() -> WorkflowRun {
        WorkflowRun::new(
            "wf_20260101_001",
            Some("storefront".to_string()),
            "build a cart",
            &default_stages(),
        )
        .with_workflow_type(WorkflowType::Complex)
    }

    #[test]
    fn test_write_creates_parent_dirs_and_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("shared").join("workflow_state.json");
        let writer = SnapshotWriter::new(&path, 3);

        let written = writer.write(&run()).unwrap();
        assert_eq!(written, path);

        let doc = writer.read().unwrap();
        assert_eq!(doc.workflow_id, "wf_20260101_001");
        assert_eq!(doc.status, WorkflowStatus::Pending);
        assert_eq!(doc.pending_agents.len(), 9);
        assert_eq!(doc.max_loops, 3);
        assert_eq!(doc.metadata.workflow_type, WorkflowType::Complex);
        assert!(doc.feature_name.is_none());
    }

    #[test]
    fn test_document_field_names() {
        let temp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(temp.path().join("workflow_state.json"), 3);
        writer.write(&run()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(writer.path()).unwrap()).unwrap();
        assert_eq!(raw["status"], json!("pending"));
        assert_eq!(raw["feature_name"], json!(null));
        assert_eq!(raw["loop_counts"]["reviewer_implementation"], json!(0));
        assert_eq!(raw["metadata"]["workflow_type"], json!("complex"));
        assert!(raw.get("human_review_required").is_some());
    }

    #[test]
    fn test_failed_run_sets_escalation_reason() {
        let mut run = run();
        run.mark_failed("pipeline exploded", Utc::now());

        let doc = WorkflowStateDocument::from_run(&run, 3);
        assert_eq!(doc.escalation_reason.as_deref(), Some("pipeline exploded"));
        assert_eq!(doc.error.as_deref(), Some("pipeline exploded"));
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(temp.path().join("workflow_state.json"), 3);

        let mut run = run();
        writer.write(&run).unwrap();
        run.mark_in_progress(&default_stages(), Utc::now());
        writer.write(&run).unwrap();

        assert_eq!(writer.read().unwrap().status, WorkflowStatus::InProgress);
        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_persist_swallows_errors() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not_a_dir");
        fs::write(&blocker, "x").unwrap();

        let writer = SnapshotWriter::new(blocker.join("workflow_state.json"), 3);
        assert!(writer.write(&run()).is_err());
        writer.persist(&run());
        assert_eq!(writer.write_count(), 0);
    }

    #[test]
    fn test_write_count_is_shared_by_clones() {
        let temp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(temp.path().join("workflow_state.json"), 3);
        let clone = writer.clone();

        writer.write(&run()).unwrap();
        clone.persist(&run());
        assert_eq!(writer.write_count(), 2);
        assert_eq!(clone.write_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_persist_from_multi_thread_worker() {
        let temp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(temp.path().join("workflow_state.json"), 3);

        let task_writer = writer.clone();
        tokio::spawn(async move {
            let mut run = run();
            task_writer.persist(&run);
            run.mark_in_progress(&default_stages(), Utc::now());
            task_writer.persist(&run);
        })
        .await
        .unwrap();

        assert_eq!(writer.write_count(), 2);
        assert_eq!(writer.read().unwrap().status, WorkflowStatus::InProgress);
    }

    #[tokio::test]
    async fn test_persist_from_current_thread_runtime() {
        let temp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(temp.path().join("workflow_state.json"), 3);

        writer.persist(&run());
        assert_eq!(writer.write_count(), 1);
    }

    #[test]
    fn test_read_missing_document_fails() {
        let temp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(temp.path().join("missing.json"), 3);
        assert!(matches!(writer.read(), Err(SnapshotError::Io(_))));
    }
}
