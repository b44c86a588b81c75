//! Run record: the state of one workflow execution.
//!
//! A `WorkflowRun` is created `Pending` by the registry and afterwards only
//! mutated by the orchestrator's run worker. Every mutation goes through the
//! methods here so the stage partition and the status state machine hold at
//! every observation point.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

use super::detector::WorkflowType;

/// Canonical agent sequence of the coding pipeline.
pub const DEFAULT_STAGES: [&str; 9] = [
    "project-planner",
    "code-architect",
    "implementation-agent",
    "code-reviewer",
    "testing-agent",
    "documentation-agent",
    "cleanup-agent",
    "git-agent",
    "retrospective-agent",
];

/// Rework loop between the code reviewer and the implementation agent.
pub const REVIEWER_LOOP: &str = "reviewer_implementation";

/// Rework loop between the testing agent and the implementation agent.
pub const TESTING_LOOP: &str = "testing_implementation";

/// Returns the default stage sequence as owned strings.
pub fn default_stages() -> Vec<String> {
    DEFAULT_STAGES.iter().map(|s| s.to_string()).collect()
}

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Accepted, worker not yet running.
    Pending,
    /// Worker is executing the pipeline.
    InProgress,
    /// Pipeline and gate both succeeded.
    Completed,
    /// Pipeline raised, or the gate rejected the result.
    Failed,
    /// Cancelled by an explicit request.
    Cancelled,
}

impl WorkflowStatus {
    /// Returns true for statuses no transition may leave.
    ///
    /// `Completed` is terminal for callers, but the run worker may still
    /// demote it to `Failed` when the post-completion gate rejects the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                | (Completed, Failed)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::InProgress => write!(f, "in_progress"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of recording one iteration of a rework loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    /// Below the ceiling, rework may proceed.
    Retry,
    /// Ceiling reached; proceed with the current output and flag for human review.
    Escalate,
}

/// State of a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique run identifier (`wf_<date>_<seq>`).
    pub workflow_id: String,
    /// Optional caller-supplied project label.
    pub project_name: Option<String>,
    /// The original work request.
    pub request: String,
    /// Classification of the request at submission time.
    pub workflow_type: WorkflowType,
    /// Current lifecycle status.
    pub status: WorkflowStatus,
    /// When the worker picked the run up.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Stage currently executing.
    pub current_agent: Option<String>,
    /// Stages already finished, in canonical order.
    pub completed_agents: Vec<String>,
    /// Stages not yet started, in canonical order.
    pub pending_agents: Vec<String>,
    /// Scores keyed by stage or gate name. Keys are never removed.
    pub quality_scores: BTreeMap<String, serde_json::Value>,
    /// Attempt counters per rework loop. Never decrease.
    pub loop_counts: BTreeMap<String, u32>,
    /// Set once a rework loop reaches its ceiling.
    pub human_review_required: bool,
    /// Final score, only on successful completion.
    pub final_score: Option<f64>,
    /// Summary text reported by the pipeline, only on successful completion.
    pub output_summary: Option<String>,
    /// Failure (or cancellation) message.
    pub error: Option<String>,
}

impl WorkflowRun {
    /// Creates a pending run holding the full stage sequence in `pending_agents`.
    pub fn new(
        workflow_id: impl Into<String>,
        project_name: Option<String>,
        request: impl Into<String>,
        stages: &[String],
    ) -> Self {
        let mut loop_counts = BTreeMap::new();
        loop_counts.insert(REVIEWER_LOOP.to_string(), 0);
        loop_counts.insert(TESTING_LOOP.to_string(), 0);

        Self {
            workflow_id: workflow_id.into(),
            project_name: project_name.filter(|p| !p.trim().is_empty()),
            request: request.into(),
            workflow_type: WorkflowType::Unknown,
            status: WorkflowStatus::Pending,
            started_at: None,
            completed_at: None,
            current_agent: None,
            completed_agents: Vec::new(),
            pending_agents: stages.to_vec(),
            quality_scores: BTreeMap::new(),
            loop_counts,
            human_review_required: false,
            final_score: None,
            output_summary: None,
            error: None,
        }
    }

    /// Sets the request classification.
    pub fn with_workflow_type(mut self, workflow_type: WorkflowType) -> Self {
        self.workflow_type = workflow_type;
        self
    }

    /// Returns true once the run reached Completed, Failed or Cancelled.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Checks `completed ++ [current?] ++ pending == canonical` with no duplicates.
    pub fn stage_partition_holds(&self, canonical: &[String]) -> bool {
        let observed: Vec<&String> = self
            .completed_agents
            .iter()
            .chain(self.current_agent.iter())
            .chain(self.pending_agents.iter())
            .collect();

        observed.len() == canonical.len() && observed.iter().zip(canonical).all(|(a, b)| *a == b)
    }

    fn transition(&mut self, next: WorkflowStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Pending -> InProgress: stamps `started_at` and resets the stage lists.
    pub(crate) fn mark_in_progress(&mut self, stages: &[String], now: DateTime<Utc>) -> bool {
        if !self.transition(WorkflowStatus::InProgress) {
            return false;
        }
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.current_agent = None;
        self.completed_agents.clear();
        self.pending_agents = stages.to_vec();
        true
    }

    /// Makes `stage` the current stage, finishing the previous one.
    ///
    /// `stage` must be the head of `pending_agents`; anything else would
    /// break the canonical ordering.
    pub(crate) fn begin_stage(&mut self, stage: &str) -> Result<(), PipelineError> {
        if self.current_agent.as_deref() == Some(stage) {
            return Ok(());
        }
        match self.pending_agents.first() {
            Some(next) if next == stage => {}
            Some(next) => {
                return Err(PipelineError::StageOrder {
                    stage: stage.to_string(),
                    expected: next.clone(),
                })
            }
            None => {
                return Err(PipelineError::StageOrder {
                    stage: stage.to_string(),
                    expected: "<none>".to_string(),
                })
            }
        }
        self.finish_current_stage();
        let next = self.pending_agents.remove(0);
        self.current_agent = Some(next);
        Ok(())
    }

    /// Moves the current stage, if any, to the end of `completed_agents`.
    pub(crate) fn finish_current_stage(&mut self) {
        if let Some(current) = self.current_agent.take() {
            self.completed_agents.push(current);
        }
    }

    /// Moves the current and every pending stage to `completed_agents`.
    pub(crate) fn complete_all_stages(&mut self) {
        self.finish_current_stage();
        self.completed_agents.append(&mut self.pending_agents);
    }

    /// Records a score. An existing key is kept and the new value is
    /// appended under `<key>#<n>`. Returns the key actually written.
    pub(crate) fn record_score(&mut self, key: &str, value: serde_json::Value) -> String {
        let mut slot = key.to_string();
        let mut attempt = 1;
        while self.quality_scores.contains_key(&slot) {
            attempt += 1;
            slot = format!("{}#{}", key, attempt);
        }
        self.quality_scores.insert(slot.clone(), value);
        slot
    }

    /// Increments a rework loop and flags human review at the ceiling.
    pub(crate) fn bump_loop(&mut self, key: &str, max_loops: u32) -> LoopDecision {
        let count = self.loop_counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        if *count >= max_loops {
            self.human_review_required = true;
            LoopDecision::Escalate
        } else {
            LoopDecision::Retry
        }
    }

    /// Merges counters reported by the pipeline, keeping the larger value.
    pub(crate) fn merge_loop_counts(&mut self, reported: &BTreeMap<String, u32>, max_loops: u32) {
        for (key, value) in reported {
            let count = self.loop_counts.entry(key.clone()).or_insert(0);
            *count = (*count).max(*value);
            if *count >= max_loops {
                self.human_review_required = true;
            }
        }
    }

    /// InProgress -> Completed with the final result fields.
    pub(crate) fn mark_completed(
        &mut self,
        final_score: f64,
        output_summary: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.transition(WorkflowStatus::Completed) {
            return false;
        }
        self.complete_all_stages();
        self.final_score = Some(final_score);
        self.output_summary = output_summary;
        self.completed_at = Some(now);
        true
    }

    /// Moves the run to Failed. `completed_at` is only stamped if unset,
    /// so a gate rejection keeps the completion time of the pipeline.
    pub(crate) fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.transition(WorkflowStatus::Failed) {
            return false;
        }
        self.error = Some(error.into());
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        true
    }

    /// Pending/InProgress -> Cancelled. The interrupted stage goes back to
    /// the head of `pending_agents`.
    pub(crate) fn mark_cancelled(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.transition(WorkflowStatus::Cancelled) {
            return false;
        }
        if let Some(current) = self.current_agent.take() {
            self.pending_agents.insert(0, current);
        }
        self.error = Some(reason.into());
        self.completed_at = Some(now);
        true
    }
}
