//! Error types for workflow-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Run registry lookups and inserts
//! - Snapshot persistence
//! - The external pipeline collaborator
//! - Workflow orchestration (gate post-conditions, cancellation)

use std::backtrace::Backtrace;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::config::ConfigError;
use crate::pipeline::record::WorkflowStatus;

/// Errors that can occur during run registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Workflow {0} not found")]
    NotFound(String),

    #[error("Workflow {0} already exists in registry")]
    DuplicateId(String),
}

/// Errors that can occur while writing or reading the workflow state snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the pipeline-execution collaborator.
///
/// Any of these turns the owning run into `Failed`; only the message is kept
/// in the run state, the full chain goes to the error log.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to spawn pipeline command '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("Pipeline timed out after {0:?}")]
    Timeout(Duration),

    #[error("Pipeline exited with non-zero code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Invalid pipeline output: {0}")]
    InvalidOutput(String),

    #[error("Pipeline panicked: {0}")]
    Panicked(String),

    #[error("Stage '{stage}' reported out of order (expected {expected})")]
    StageOrder { stage: String, expected: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Short name of the error variant, used in error log documents.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Spawn { .. } => "Spawn",
            PipelineError::Timeout(_) => "Timeout",
            PipelineError::NonZeroExit { .. } => "NonZeroExit",
            PipelineError::InvalidOutput(_) => "InvalidOutput",
            PipelineError::Panicked(_) => "Panicked",
            PipelineError::StageOrder { .. } => "StageOrder",
            PipelineError::Io(_) => "Io",
            PipelineError::Other(_) => "Other",
        }
    }

    /// Backtrace captured where the error was created, if the variant carries one.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            PipelineError::Other(e) => Some(e.backtrace()),
            _ => None,
        }
    }
}

/// Errors surfaced by the workflow orchestrator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow {0} not found")]
    NotFound(String),

    #[error("Workflow {0} already exists")]
    DuplicateId(String),

    #[error("Invalid workflow request: {0}")]
    InvalidRequest(String),

    #[error("Workflow gate failed: {0}")]
    GateFailure(String),

    #[error("Workflow gate failed: {0}")]
    GateTimeout(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Workflow {id} already finished with status {status}")]
    AlreadyTerminal { id: String, status: WorkflowStatus },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<RegistryError> for WorkflowError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => WorkflowError::NotFound(id),
            RegistryError::DuplicateId(id) => WorkflowError::DuplicateId(id),
        }
    }
}
