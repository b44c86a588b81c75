//! Transport-independent workflow service.
//!
//! Validates incoming bodies, calls the orchestrator and maps its errors to
//! `ApiError`. An HTTP layer only has to route to these methods.

use std::sync::Arc;

use tracing::debug;

use crate::pipeline::{WorkflowOrchestrator, WorkflowStatus};

use super::error::{ApiError, ApiResult};
use super::types::{
    CancelWorkflowRequest, CancelWorkflowResponse, HealthResponse, StartWorkflowRequest,
    StartWorkflowResponse, WorkflowResultResponse, WorkflowStatusResponse,
};

/// Name reported by the health probe.
pub const SERVICE_NAME: &str = "workflow-forge";

/// Message returned for every accepted workflow.
pub const ACCEPTED_MESSAGE: &str = "Workflow accepted and queued.";

/// Service facade over a shared orchestrator.
#[derive(Clone)]
pub struct WorkflowService {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl WorkflowService {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// The orchestrator behind this service.
    pub fn orchestrator(&self) -> &Arc<WorkflowOrchestrator> {
        &self.orchestrator
    }

    /// Starts a workflow. Returns immediately with status `pending`.
    pub fn start(&self, body: StartWorkflowRequest) -> ApiResult<StartWorkflowResponse> {
        if body.request.trim().is_empty() {
            return Err(ApiError::bad_request("Field 'request' must not be empty"));
        }

        let started =
            self.orchestrator
                .start(&body.request, body.project_name, body.force_full_workflow)?;
        debug!(
            "Workflow {} classified as {}: {}",
            started.workflow_id, started.detection.workflow_type, started.detection.suggestion
        );

        Ok(StartWorkflowResponse {
            workflow_id: started.workflow_id,
            status: WorkflowStatus::Pending,
            message: ACCEPTED_MESSAGE.to_string(),
            workflow_type: started.detection.workflow_type,
        })
    }

    /// Current progress of a workflow.
    pub fn status(&self, workflow_id: &str) -> ApiResult<WorkflowStatusResponse> {
        Ok(self.orchestrator.get(workflow_id)?.into())
    }

    /// Outcome of a workflow; fields stay empty until it finishes.
    pub fn result(&self, workflow_id: &str) -> ApiResult<WorkflowResultResponse> {
        Ok(self.orchestrator.get(workflow_id)?.into())
    }

    /// Cancels a pending or running workflow.
    pub fn cancel(
        &self,
        workflow_id: &str,
        body: CancelWorkflowRequest,
    ) -> ApiResult<CancelWorkflowResponse> {
        let run = self
            .orchestrator
            .cancel(workflow_id, body.reason.as_deref())?;
        Ok(CancelWorkflowResponse {
            message: run
                .error
                .clone()
                .unwrap_or_else(|| "Workflow cancelled.".to_string()),
            workflow_id: run.workflow_id,
            status: run.status,
        })
    }

    /// Liveness probe.
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            runs: self.orchestrator.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::{
        PipelineExecutor, PipelineInput, PipelineOutput, StageReporter, WorkflowConfig,
    };
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct EchoExecutor;

    #[async_trait]
    impl PipelineExecutor for EchoExecutor {
        async fn execute(
            &self,
            input: PipelineInput,
            _reporter: StageReporter,
        ) -> Result<PipelineOutput, PipelineError> {
            Ok(PipelineOutput::new().with_output(input.request))
        }
    }

    fn service(temp: &TempDir) -> WorkflowService {
        let config = WorkflowConfig::new().with_workspace_root(temp.path());
        let orchestrator = WorkflowOrchestrator::new(config, Arc::new(EchoExecutor)).unwrap();
        WorkflowService::new(Arc::new(orchestrator))
    }

    #[tokio::test]
    async fn test_start_returns_pending() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        let resp = svc
            .start(StartWorkflowRequest::new("add a login page"))
            .unwrap();
        assert_eq!(resp.status, WorkflowStatus::Pending);
        assert_eq!(resp.message, ACCEPTED_MESSAGE);
        assert!(resp.workflow_id.starts_with("wf_"));

        let run = svc.orchestrator().wait(&resp.workflow_id).await.unwrap();
        let result = svc.result(&run.workflow_id).unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.output_summary.as_deref(), Some("add a login page"));
    }

    #[tokio::test]
    async fn test_empty_request_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let err = service(&temp)
            .start(StartWorkflowRequest::new("  "))
            .unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let temp = TempDir::new().unwrap();
        let svc = service(&temp);

        assert_eq!(svc.status("wf_nope").unwrap_err().status, 404);
        assert_eq!(svc.result("wf_nope").unwrap_err().status, 404);
        assert_eq!(
            svc.cancel("wf_nope", CancelWorkflowRequest::default())
                .unwrap_err()
                .code
                .as_deref(),
            Some("NOT_FOUND")
        );
    }

    #[tokio::test]
    async fn test_health() {
        let temp = TempDir::new().unwrap();
        let health = service(&temp).health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.service, SERVICE_NAME);
        assert_eq!(health.runs.total, 0);
    }
}
