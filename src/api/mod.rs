//! Service surface of the orchestrator.
//!
//! Typed request/response bodies and a `WorkflowService` that an HTTP (or
//! any other) transport can route to: start, status, result, cancel and a
//! health probe. Unknown workflow ids map to a 404 `NOT_FOUND` error.

pub mod error;
pub mod service;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use service::{WorkflowService, ACCEPTED_MESSAGE, SERVICE_NAME};
pub use types::{
    CancelWorkflowRequest, CancelWorkflowResponse, HealthResponse, StartWorkflowRequest,
    StartWorkflowResponse, WorkflowResultResponse, WorkflowStatusResponse,
};
