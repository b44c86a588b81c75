//! Run worker: drives one workflow run from Pending to a terminal status.
//!
//! 1. Mark the run in progress and snapshot.
//! 2. Hand it to the pipeline executor, converting panics into errors.
//! 3. On success, merge the reported results, complete every stage and snapshot.
//! 4. Run the workflow gate; a rejection demotes the run to Failed.
//! 5. On failure, mark the run Failed and write an error log document.
//!
//! Every terminal transition writes the snapshot exactly once, at the
//! point it happens. A `SnapshotGuard` covers the exits that skip those
//! writes: a worker aborted or unwinding while the run is still in progress.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::metrics;

use super::error_log::ErrorLog;
use super::executor::{PipelineExecutor, PipelineInput, PipelineOutput, StageReporter};
use super::gate::{GateChecker, GateMode};
use super::quality::QualityGates;
use super::record::WorkflowRun;
use super::registry::{lock_run, RunHandle};
use super::snapshot::SnapshotWriter;

/// Everything a worker needs besides the executor.
#[derive(Clone)]
pub(crate) struct RunContext {
    pub stages: Vec<String>,
    pub snapshot: SnapshotWriter,
    pub gate: GateChecker,
    pub gate_mode: GateMode,
    pub error_log: ErrorLog,
    pub quality_gates: QualityGates,
    pub max_loops: u32,
    pub default_final_score: f64,
}

/// Closes the run's metrics when dropped, and writes its state if the run
/// never reached a terminal status.
struct SnapshotGuard {
    run: RunHandle,
    snapshot: SnapshotWriter,
    started: Instant,
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        let run = lock_run(&self.run);
        if !run.is_terminal() {
            self.snapshot.persist_inline(&run);
        }
        metrics::record_run_finished(&run.status.to_string(), self.started.elapsed());
        metrics::record_run_inactive();
    }
}

/// Executes one run to completion.
pub(crate) async fn run_workflow(
    handle: RunHandle,
    ctx: RunContext,
    executor: Arc<dyn PipelineExecutor>,
) {
    let input = {
        let mut run = lock_run(&handle);
        if !run.mark_in_progress(&ctx.stages, Utc::now()) {
            // Cancelled before the worker got scheduled.
            return;
        }
        ctx.snapshot.persist(&run);
        PipelineInput {
            workflow_id: run.workflow_id.clone(),
            request: run.request.clone(),
            project_name: run.project_name.clone(),
        }
    };

    metrics::record_run_active();
    let _guard = SnapshotGuard {
        run: handle.clone(),
        snapshot: ctx.snapshot.clone(),
        started: Instant::now(),
    };
    info!("Workflow {} started", input.workflow_id);

    let reporter = StageReporter::new(
        handle.clone(),
        ctx.snapshot.clone(),
        ctx.quality_gates.clone(),
        ctx.max_loops,
    );
    let workflow_id = input.workflow_id.clone();

    let result = match AssertUnwindSafe(executor.execute(input, reporter))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(PipelineError::Panicked(panic_message(panic.as_ref()))),
    };

    match result {
        Ok(output) => {
            if complete(&handle, &ctx, output) {
                apply_gate(&handle, &ctx, &workflow_id).await;
            }
        }
        Err(e) => fail(&handle, &ctx, &workflow_id, e),
    }
}

/// Applies a successful pipeline result. Returns false if the run was
/// already terminal (cancelled while the pipeline ran).
fn complete(handle: &RunHandle, ctx: &RunContext, output: PipelineOutput) -> bool {
    let mut run = lock_run(handle);
    if run.is_terminal() {
        return false;
    }

    for (key, value) in output.quality_scores {
        run.record_score(&key, value);
    }
    run.merge_loop_counts(&output.loop_counts, ctx.max_loops);

    let final_score = output
        .final_score
        .or_else(|| mean_stage_score(&run, &ctx.stages))
        .unwrap_or(ctx.default_final_score);

    if !run.mark_completed(final_score, output.output, Utc::now()) {
        return false;
    }
    ctx.snapshot.persist(&run);
    info!(
        "Workflow {} completed with score {:.1}{}",
        run.workflow_id,
        final_score,
        if run.human_review_required {
            " (human review required)"
        } else {
            ""
        }
    );
    true
}

/// Runs the gate and demotes the run to Failed if it rejects.
async fn apply_gate(handle: &RunHandle, ctx: &RunContext, workflow_id: &str) {
    let outcome = ctx.gate.check(ctx.gate_mode).await;
    let Some(err) = outcome.into_error() else {
        return;
    };

    let mut run = lock_run(handle);
    if run.mark_failed(err.to_string(), Utc::now()) {
        warn!("Workflow {} failed its gate: {}", workflow_id, err);
        ctx.snapshot.persist(&run);
    }
}

/// Marks the run Failed and writes the error log document.
fn fail(handle: &RunHandle, ctx: &RunContext, workflow_id: &str, err: PipelineError) {
    error!("Workflow {} failed: {}", workflow_id, err);

    match ctx.error_log.record(workflow_id, &err) {
        Ok(path) => info!("Error details for {} written to {}", workflow_id, path.display()),
        Err(e) => warn!("Failed to write error log for {}: {}", workflow_id, e),
    }

    let mut run = lock_run(handle);
    if run.mark_failed(err.to_string(), Utc::now()) {
        ctx.snapshot.persist(&run);
    }
}

/// Mean of the numeric scores recorded under stage names, if any.
fn mean_stage_score(run: &WorkflowRun, stages: &[String]) -> Option<f64> {
    let scores: Vec<f64> = run
        .quality_scores
        .iter()
        .filter(|(key, _)| {
            let base = key.split('#').next().unwrap_or(key.as_str());
            stages.iter().any(|s| s == base)
        })
        .filter_map(|(_, value)| value.as_f64())
        .collect();

    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
