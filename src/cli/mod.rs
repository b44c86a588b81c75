//! Command-line interface for workflow-forge.
//!
//! Provides commands for running a workflow, inspecting the shared state
//! document, running the workflow gate, and classifying requests.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
