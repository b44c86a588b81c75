//! Pipeline-execution collaborator.
//!
//! The orchestrator does not run agents itself. It hands each run to a
//! `PipelineExecutor` together with a `StageReporter` through which the
//! executor reports stage progress, scores and rework loops while it works.
//!
//! `CommandExecutor` is the stock implementation: it runs an external
//! command, feeds it the request as JSON on stdin and reads progress lines
//! from its stdout:
//!
//! ```text
//! ::stage code-reviewer
//! ::score code-reviewer 87
//! ::loop reviewer_implementation
//! ```
//!
//! The last stdout line may be a JSON object with the final result
//! (`output`, `final_score`, `quality_scores`, `loop_counts`).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

use super::quality::{QualityGates, StageGateResult};
use super::record::LoopDecision;
use super::registry::{lock_run, RunHandle};
use super::snapshot::SnapshotWriter;

/// What the executor is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInput {
    pub workflow_id: String,
    pub request: String,
    pub project_name: Option<String>,
}

/// What the executor reports back on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOutput {
    /// Summary of the produced work.
    pub output: Option<String>,
    /// Overall score; derived from stage scores when absent.
    pub final_score: Option<f64>,
    /// Extra scores merged into the run.
    pub quality_scores: BTreeMap<String, serde_json::Value>,
    /// Rework loop counters merged into the run.
    pub loop_counts: BTreeMap<String, u32>,
}

impl PipelineOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_final_score(mut self, score: f64) -> Self {
        self.final_score = Some(score);
        self
    }

    pub fn with_score(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.quality_scores.insert(key.into(), value);
        self
    }

    pub fn with_loop_count(mut self, key: impl Into<String>, count: u32) -> Self {
        self.loop_counts.insert(key.into(), count);
        self
    }
}

/// Runs the multi-agent pipeline for one workflow.
#[async_trait]
pub trait PipelineExecutor: Send + Sync {
    /// Executes the pipeline. Progress goes through `reporter`; any error
    /// fails the run.
    async fn execute(
        &self,
        input: PipelineInput,
        reporter: StageReporter,
    ) -> Result<PipelineOutput, PipelineError>;
}

/// Progress channel from the executor back into the run record.
///
/// Every accepted call is followed by a snapshot write made under the record
/// lock, so snapshots of one run are never written out of order. Once the
/// run is terminal (for example after a cancel) calls are ignored.
#[derive(Clone)]
pub struct StageReporter {
    run: RunHandle,
    snapshot: SnapshotWriter,
    gates: QualityGates,
    max_loops: u32,
}

impl StageReporter {
    pub(crate) fn new(
        run: RunHandle,
        snapshot: SnapshotWriter,
        gates: QualityGates,
        max_loops: u32,
    ) -> Self {
        Self {
            run,
            snapshot,
            gates,
            max_loops,
        }
    }

    /// Id of the run being reported on.
    pub fn workflow_id(&self) -> String {
        lock_run(&self.run).workflow_id.clone()
    }

    /// Returns false once the run reached a terminal status.
    pub fn is_active(&self) -> bool {
        !lock_run(&self.run).is_terminal()
    }

    /// Starts `stage`, finishing the previous one.
    ///
    /// `stage` must be the next pending stage.
    pub fn begin_stage(&self, stage: &str) -> Result<(), PipelineError> {
        let mut run = lock_run(&self.run);
        if run.is_terminal() {
            return Ok(());
        }
        run.begin_stage(stage)?;
        debug!("{}: stage {} started", run.workflow_id, stage);
        self.snapshot.persist(&run);
        Ok(())
    }

    /// Finishes `stage` with its self-assessed score.
    ///
    /// The score is recorded under the stage name and the threshold check
    /// under `<stage>_gate`. A stage that was never begun is begun first.
    pub fn complete_stage(&self, stage: &str, score: f64) -> Result<StageGateResult, PipelineError> {
        let result = self.gates.evaluate(stage, score);
        let mut run = lock_run(&self.run);
        if run.is_terminal() {
            return Ok(result);
        }
        run.begin_stage(stage)?;
        run.finish_current_stage();
        run.record_score(stage, serde_json::json!(score));
        run.record_score(
            &format!("{}_gate", stage),
            serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
        );

        if result.passed {
            debug!("{}: stage {} scored {}", run.workflow_id, stage, score);
        } else {
            warn!(
                "{}: stage {} scored {} below threshold {:?}",
                run.workflow_id, stage, score, result.threshold
            );
        }
        self.snapshot.persist(&run);
        Ok(result)
    }

    /// Records an arbitrary score. Returns the key actually written.
    pub fn record_score(&self, key: &str, value: serde_json::Value) -> Option<String> {
        let mut run = lock_run(&self.run);
        if run.is_terminal() {
            return None;
        }
        let slot = run.record_score(key, value);
        self.snapshot.persist(&run);
        Some(slot)
    }

    /// Counts one iteration of a rework loop.
    ///
    /// Answers `Escalate` when the loop reached its ceiling; the run is then
    /// flagged for human review and should proceed with its current output.
    pub fn record_loop(&self, key: &str) -> LoopDecision {
        let mut run = lock_run(&self.run);
        if run.is_terminal() {
            return LoopDecision::Escalate;
        }
        let decision = run.bump_loop(key, self.max_loops);
        if decision == LoopDecision::Escalate {
            warn!(
                "{}: loop {} reached {} iterations, human review required",
                run.workflow_id, key, self.max_loops
            );
        }
        self.snapshot.persist(&run);
        decision
    }
}

/// A progress line emitted by a command pipeline.
#[derive(Debug, Clone, PartialEq)]
enum Directive {
    Stage(String),
    Score { stage: String, score: f64 },
    Loop(String),
}

fn parse_directive(line: &str) -> Option<Directive> {
    let rest = line.trim().strip_prefix("::")?;
    let mut parts = rest.split_whitespace();
    match (parts.next()?, parts.next(), parts.next()) {
        ("stage", Some(stage), None) => Some(Directive::Stage(stage.to_string())),
        ("score", Some(stage), Some(score)) => score.parse().ok().map(|score| Directive::Score {
            stage: stage.to_string(),
            score,
        }),
        ("loop", Some(key), None) => Some(Directive::Loop(key.to_string())),
        _ => None,
    }
}

/// Runs the pipeline as an external command.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    env_vars: Vec<(String, String)>,
    timeout: Duration,
}

impl CommandExecutor {
    /// Creates an executor running `command` from the current directory
    /// with a one hour timeout.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            env_vars: Vec::new(),
            timeout: Duration::from_secs(3600),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn drive(
        &self,
        input: &PipelineInput,
        reporter: &StageReporter,
    ) -> Result<PipelineOutput, PipelineError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .env("WORKFLOW_ID", &input.workflow_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| PipelineError::Spawn {
            command: self.command.clone(),
            reason: e.to_string(),
        })?;

        // Fed from its own task so a pipeline that prints before reading
        // cannot stall on a full stdout pipe.
        let stdin_task = match child.stdin.take() {
            Some(mut stdin) => {
                let payload = serde_json::to_vec(input)
                    .map_err(|e| PipelineError::InvalidOutput(format!("encode input: {}", e)))?;
                Some(tokio::spawn(async move {
                    // A pipeline that ignores stdin may exit before reading it.
                    if let Err(e) = stdin.write_all(&payload).await {
                        debug!("Pipeline did not read its input: {}", e);
                    }
                    stdin.shutdown().await.ok();
                }))
            }
            None => None,
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::InvalidOutput("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::InvalidOutput("stderr not captured".to_string()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            stderr.read_to_string(&mut buf).await.map(|_| buf)
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut plain = Vec::new();
        while let Some(line) = lines.next_line().await? {
            match parse_directive(&line) {
                Some(Directive::Stage(stage)) => reporter.begin_stage(&stage)?,
                Some(Directive::Score { stage, score }) => {
                    reporter.complete_stage(&stage, score)?;
                }
                Some(Directive::Loop(key)) => {
                    reporter.record_loop(&key);
                }
                None => plain.push(line),
            }
        }

        let status = child.wait().await?;
        if let Some(task) = stdin_task {
            task.await.ok();
        }
        let stderr = stderr_task
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();

        if !status.success() {
            return Err(PipelineError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(parse_output(&plain))
    }
}

/// Uses the last non-empty line as the result document when it is a JSON
/// object, otherwise the whole text as the summary.
fn parse_output(lines: &[String]) -> PipelineOutput {
    let last = lines.iter().rev().find(|l| !l.trim().is_empty());
    if let Some(last) = last {
        let trimmed = last.trim();
        if trimmed.starts_with('{') {
            if let Ok(output) = serde_json::from_str::<PipelineOutput>(trimmed) {
                return output;
            }
        }
    }

    let text = lines.join("\n").trim().to_string();
    PipelineOutput {
        output: if text.is_empty() { None } else { Some(text) },
        ..PipelineOutput::default()
    }
}

#[async_trait]
impl PipelineExecutor for CommandExecutor {
    async fn execute(
        &self,
        input: PipelineInput,
        reporter: StageReporter,
    ) -> Result<PipelineOutput, PipelineError> {
        let start = Instant::now();
        info!(
            "Starting pipeline command {} for {} in {}",
            self.command,
            input.workflow_id,
            self.working_dir.display()
        );

        let result = tokio::time::timeout(self.timeout, self.drive(&input, &reporter))
            .await
            .unwrap_or_else(|_| Err(PipelineError::Timeout(self.timeout)));

        debug!(
            "Pipeline command for {} finished in {:?}",
            input.workflow_id,
            start.elapsed()
        );
        result
    }
}
