//! Prometheus metrics registration and export.
//!
//! Defines every metric workflow-forge records and the functions for
//! initializing the registry and exporting it in text format.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all workflow-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of workflow runs accepted.
pub static RUNS_STARTED_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Total number of workflow runs finished, labeled by final status.
pub static RUNS_FINISHED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of runs whose worker is currently executing.
pub static ACTIVE_RUNS: OnceLock<Gauge> = OnceLock::new();

/// Run duration in seconds from worker start to terminal status, labeled by status.
pub static RUN_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Total gate invocations, labeled by verdict.
pub static GATE_CHECKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Gate invocation duration in seconds, labeled by verdict.
pub static GATE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording helpers are no-ops until this has run,
/// and calling it again leaves the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric cannot be created or registered.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let runs_started = IntCounter::new(
        "workflow_forge_runs_started_total",
        "Total number of workflow runs accepted",
    )?;

    let runs_finished = CounterVec::new(
        Opts::new(
            "workflow_forge_runs_finished_total",
            "Total number of workflow runs finished",
        ),
        &["status"],
    )?;

    let active_runs = Gauge::new(
        "workflow_forge_active_runs",
        "Number of workflow runs currently executing",
    )?;

    let run_duration = HistogramVec::new(
        HistogramOpts::new(
            "workflow_forge_run_duration_seconds",
            "Workflow run duration in seconds",
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]),
        &["status"],
    )?;

    let gate_checks = CounterVec::new(
        Opts::new(
            "workflow_forge_gate_checks_total",
            "Total workflow gate invocations",
        ),
        &["verdict"],
    )?;

    let gate_duration = HistogramVec::new(
        HistogramOpts::new(
            "workflow_forge_gate_duration_seconds",
            "Workflow gate duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        &["verdict"],
    )?;

    registry.register(Box::new(runs_started.clone()))?;
    registry.register(Box::new(runs_finished.clone()))?;
    registry.register(Box::new(active_runs.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;
    registry.register(Box::new(gate_checks.clone()))?;
    registry.register(Box::new(gate_duration.clone()))?;

    // A concurrent initializer may win these; its metrics are equivalent.
    let _ = REGISTRY.set(registry);
    let _ = RUNS_STARTED_TOTAL.set(runs_started);
    let _ = RUNS_FINISHED_TOTAL.set(runs_finished);
    let _ = ACTIVE_RUNS.set(active_runs);
    let _ = RUN_DURATION.set(run_duration);
    let _ = GATE_CHECKS_TOTAL.set(gate_checks);
    let _ = GATE_DURATION.set(gate_duration);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry is not initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
