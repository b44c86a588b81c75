//! Request and response bodies of the workflow service.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{OrchestratorStats, WorkflowRun, WorkflowStatus, WorkflowType};

/// Body of a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWorkflowRequest {
    /// Feature description or task.
    pub request: String,
    #[serde(default)]
    pub project_name: Option<String>,
    /// Skip request classification and run the full pipeline.
    #[serde(default)]
    pub force_full_workflow: bool,
}

impl StartWorkflowRequest {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            project_name: None,
            force_full_workflow: false,
        }
    }

    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    pub fn with_force_full_workflow(mut self, force: bool) -> Self {
        self.force_full_workflow = force;
        self
    }
}

/// Answer to a start request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartWorkflowResponse {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub message: String,
    pub workflow_type: WorkflowType,
}

/// Progress view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusResponse {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub project_name: Option<String>,
    pub current_agent: Option<String>,
    pub completed_agents: Vec<String>,
    pub pending_agents: Vec<String>,
    pub quality_scores: BTreeMap<String, serde_json::Value>,
    pub loop_counts: BTreeMap<String, u32>,
    pub human_review_required: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<WorkflowRun> for WorkflowStatusResponse {
    fn from(run: WorkflowRun) -> Self {
        Self {
            workflow_id: run.workflow_id,
            status: run.status,
            project_name: run.project_name,
            current_agent: run.current_agent,
            completed_agents: run.completed_agents,
            pending_agents: run.pending_agents,
            quality_scores: run.quality_scores,
            loop_counts: run.loop_counts,
            human_review_required: run.human_review_required,
            started_at: run.started_at,
            completed_at: run.completed_at,
            error: run.error,
        }
    }
}

/// Outcome view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResultResponse {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub final_score: Option<f64>,
    pub output_summary: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<WorkflowRun> for WorkflowResultResponse {
    fn from(run: WorkflowRun) -> Self {
        Self {
            workflow_id: run.workflow_id,
            status: run.status,
            final_score: run.final_score,
            output_summary: run.output_summary,
            completed_at: run.completed_at,
            error: run.error,
        }
    }
}

/// Body of a cancel request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelWorkflowRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Answer to a cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelWorkflowResponse {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub message: String,
}

/// Liveness probe answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub runs: OrchestratorStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_defaults() {
        let req: StartWorkflowRequest =
            serde_json::from_str(r#"{"request": "add a login page"}"#).unwrap();
        assert_eq!(req, StartWorkflowRequest::new("add a login page"));
        assert!(!req.force_full_workflow);
    }

    #[test]
    fn test_status_response_from_run() {
        let run = WorkflowRun::new(
            "wf_20260101_001",
            Some("shop".to_string()),
            "build a cart",
            &crate::pipeline::default_stages(),
        );
        let resp = WorkflowStatusResponse::from(run);
        assert_eq!(resp.status, WorkflowStatus::Pending);
        assert_eq!(resp.project_name.as_deref(), Some("shop"));
        assert_eq!(resp.pending_agents.len(), 9);

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json["current_agent"].is_null());
    }
}
