//! Recording helpers for workflow metrics.
//!
//! Each helper silently does nothing when `init_metrics()` has not been
//! called, so library users that do not export metrics pay nothing.

use std::time::Duration;

use super::prometheus::{
    ACTIVE_RUNS, GATE_CHECKS_TOTAL, GATE_DURATION, RUNS_FINISHED_TOTAL, RUNS_STARTED_TOTAL,
    RUN_DURATION,
};

/// Records an accepted run.
pub fn record_run_started() {
    if let Some(counter) = RUNS_STARTED_TOTAL.get() {
        counter.inc();
    }
}

/// Records a worker picking up a run.
pub fn record_run_active() {
    if let Some(gauge) = ACTIVE_RUNS.get() {
        gauge.inc();
    }
}

/// Records a worker letting go of a run.
pub fn record_run_inactive() {
    if let Some(gauge) = ACTIVE_RUNS.get() {
        gauge.dec();
    }
}

/// Records a run reaching its final status after `elapsed` of execution.
pub fn record_run_finished(status: &str, elapsed: Duration) {
    if let Some(counter) = RUNS_FINISHED_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
    if let Some(histogram) = RUN_DURATION.get() {
        histogram
            .with_label_values(&[status])
            .observe(elapsed.as_secs_f64());
    }
}

/// Records one gate invocation.
pub fn record_gate_check(verdict: &str, elapsed: Duration) {
    if let Some(counter) = GATE_CHECKS_TOTAL.get() {
        counter.with_label_values(&[verdict]).inc();
    }
    if let Some(histogram) = GATE_DURATION.get() {
        histogram
            .with_label_values(&[verdict])
            .observe(elapsed.as_secs_f64());
    }
}
