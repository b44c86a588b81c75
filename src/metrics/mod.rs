//! Metrics module for Prometheus-based monitoring.
//!
//! Counts workflow runs by outcome, tracks how many are executing, and
//! times runs and gate checks.
//!
//! # Example
//!
//! ```ignore
//! use workflow_forge::metrics::{export_metrics, init_metrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! // ... run workflows ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{
    record_gate_check, record_run_active, record_run_finished, record_run_inactive,
    record_run_started,
};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_RUNS, GATE_CHECKS_TOTAL, GATE_DURATION, REGISTRY, RUNS_FINISHED_TOTAL,
    RUNS_STARTED_TOTAL, RUN_DURATION,
};
