//! Workflow orchestrator.
//!
//! Accepts work requests, registers a run for each, and launches one tokio
//! task per run that drives it through the pipeline. Callers poll by id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

use crate::error::WorkflowError;
use crate::metrics;

use super::config::WorkflowConfig;
use super::detector::{Detection, RequestClassifier};
use super::error_log::ErrorLog;
use super::executor::PipelineExecutor;
use super::gate::GateChecker;
use super::record::{WorkflowRun, WorkflowStatus};
use super::registry::{lock_run, RunRegistry};
use super::runner::{run_workflow, RunContext};
use super::snapshot::{SnapshotWriter, WorkflowStateDocument};

/// Reason recorded when `cancel` is called without one.
pub const DEFAULT_CANCEL_REASON: &str = "Cancelled by request";

/// A freshly accepted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedWorkflow {
    pub workflow_id: String,
    pub detection: Detection,
}

/// Run counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl OrchestratorStats {
    fn from_statuses(statuses: &[WorkflowStatus]) -> Self {
        let mut stats = Self {
            total: statuses.len(),
            ..Self::default()
        };
        for status in statuses {
            match status {
                WorkflowStatus::Pending => stats.pending += 1,
                WorkflowStatus::InProgress => stats.in_progress += 1,
                WorkflowStatus::Completed => stats.completed += 1,
                WorkflowStatus::Failed => stats.failed += 1,
                WorkflowStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Runs not yet terminal.
    pub fn active(&self) -> usize {
        self.pending + self.in_progress
    }
}

struct Worker {
    join: Option<JoinHandle<()>>,
    abort: AbortHandle,
}

/// Coordinates workflow runs.
pub struct WorkflowOrchestrator {
    config: WorkflowConfig,
    registry: RunRegistry,
    executor: Arc<dyn PipelineExecutor>,
    classifier: RequestClassifier,
    context: RunContext,
    workers: Mutex<HashMap<String, Worker>>,
}

impl WorkflowOrchestrator {
    /// Creates an orchestrator after validating `config`.
    pub fn new(
        config: WorkflowConfig,
        executor: Arc<dyn PipelineExecutor>,
    ) -> Result<Self, WorkflowError> {
        config.validate()?;

        let context = RunContext {
            stages: config.stages.clone(),
            snapshot: SnapshotWriter::new(config.snapshot_path(), config.max_loops),
            gate: GateChecker::from_config(&config),
            gate_mode: config.gate_mode,
            error_log: ErrorLog::new(config.error_log_dir()),
            quality_gates: config.quality_gates.clone(),
            max_loops: config.max_loops,
            default_final_score: config.default_final_score,
        };

        info!(
            "Workflow orchestrator ready: {} stages, snapshot at {}",
            config.stages.len(),
            context.snapshot.path().display()
        );

        Ok(Self {
            registry: RunRegistry::new(config.stages.clone()),
            config,
            executor,
            classifier: RequestClassifier::new(),
            context,
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Returns the run registry.
    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Accepts a request and launches its run in the background.
    ///
    /// Returns as soon as the run is registered; it is still `Pending`.
    /// Must be called from within a tokio runtime.
    pub fn start(
        &self,
        request: &str,
        project_name: Option<String>,
        force_full_pipeline: bool,
    ) -> Result<StartedWorkflow, WorkflowError> {
        let request = request.trim();
        if request.is_empty() {
            return Err(WorkflowError::InvalidRequest(
                "request must not be empty".to_string(),
            ));
        }

        let detection = self.classifier.detect(request, force_full_pipeline);
        let run = self
            .registry
            .allocate(project_name, request, detection.workflow_type);
        let workflow_id = run.workflow_id.clone();
        let handle = self.registry.handle(&workflow_id)?;

        self.context.snapshot.persist(&lock_run(&handle));
        metrics::record_run_started();
        info!(
            "Accepted workflow {} ({}, complexity {})",
            workflow_id, detection.workflow_type, detection.complexity_score
        );

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|_, worker| !worker.abort.is_finished());
        let join = tokio::spawn(run_workflow(
            handle,
            self.context.clone(),
            Arc::clone(&self.executor),
        ));
        workers.insert(
            workflow_id.clone(),
            Worker {
                abort: join.abort_handle(),
                join: Some(join),
            },
        );

        Ok(StartedWorkflow {
            workflow_id,
            detection,
        })
    }

    /// Returns a copy of a run.
    pub fn get(&self, workflow_id: &str) -> Result<WorkflowRun, WorkflowError> {
        Ok(self.registry.get(workflow_id)?)
    }

    /// Returns the status of a run.
    pub fn status(&self, workflow_id: &str) -> Result<WorkflowStatus, WorkflowError> {
        Ok(self.get(workflow_id)?.status)
    }

    /// Builds the state document of a run as it would be written to disk.
    pub fn snapshot(&self, workflow_id: &str) -> Result<WorkflowStateDocument, WorkflowError> {
        let run = self.get(workflow_id)?;
        Ok(WorkflowStateDocument::from_run(&run, self.config.max_loops))
    }

    /// Cancels a pending or running workflow.
    ///
    /// The interrupted stage goes back to the head of the pending list and
    /// the worker task is aborted. Finished runs are left untouched.
    pub fn cancel(
        &self,
        workflow_id: &str,
        reason: Option<&str>,
    ) -> Result<WorkflowRun, WorkflowError> {
        let handle = self.registry.handle(workflow_id)?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_CANCEL_REASON);

        let (previous, run) = {
            let mut run = lock_run(&handle);
            let previous = run.status;
            if !run.mark_cancelled(reason, Utc::now()) {
                return Err(WorkflowError::AlreadyTerminal {
                    id: workflow_id.to_string(),
                    status: previous,
                });
            }
            self.context.snapshot.persist(&run);
            (previous, run.clone())
        };

        if previous == WorkflowStatus::Pending {
            // The worker will never start, so nothing else closes the run's metrics.
            metrics::record_run_finished(&WorkflowStatus::Cancelled.to_string(), Duration::ZERO);
        }

        if let Some(worker) = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
        {
            worker.abort.abort();
        }

        info!("Workflow {} cancelled: {}", workflow_id, reason);
        Ok(run)
    }

    /// Waits for a run's worker to finish and returns the final record.
    ///
    /// Only the first waiter on a run actually awaits the worker; later
    /// calls return the current record immediately. The worker's entry is
    /// dropped once it has been joined. Workers nobody waits for are
    /// dropped by the next `start` after they finish.
    pub async fn wait(&self, workflow_id: &str) -> Result<WorkflowRun, WorkflowError> {
        let join = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(workflow_id)
            .and_then(|w| w.join.take());

        if let Some(join) = join {
            if let Err(e) = join.await {
                debug!("Worker for {} ended abnormally: {}", workflow_id, e);
            }
            self.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(workflow_id);
        }
        self.get(workflow_id)
    }

    /// Number of worker tasks still tracked.
    pub(crate) fn tracked_workers(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run counts by status.
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats::from_statuses(&self.registry.statuses())
    }
}
