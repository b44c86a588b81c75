//! workflow-forge: orchestration core for a staged multi-agent coding pipeline.
//!
//! This library accepts natural-language work requests, runs each through a
//! fixed sequence of agent stages via a pluggable executor, applies a
//! post-completion gate, and keeps an external state document current.

// Core modules
pub mod api;
pub mod cli;
pub mod error;
pub mod metrics;
pub mod pipeline;

// Re-export commonly used types
pub use error::{PipelineError, RegistryError, SnapshotError, WorkflowError};
pub use pipeline::{
    PipelineExecutor, WorkflowConfig, WorkflowOrchestrator, WorkflowRun, WorkflowStatus,
};
