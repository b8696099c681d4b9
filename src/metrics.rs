//! Prometheus metrics for the governance engine.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_verification`, `inc_anomaly`, …) are no-ops if `init_metrics` was
//! never called, so the engine is always safe to run and observability simply
//! degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `governance_verifications_total` | Counter | `producer`, `outcome` |
//! | `governance_anomalies_total` | Counter | `producer`, `class` |
//! | `governance_degradations_total` | Counter | `producer` |
//! | `governance_treatments_total` | Counter | `treatment`, `status` |
//! | `governance_process_duration_seconds` | Histogram | none |

use crate::GovernanceError;
use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::OnceLock;
use std::time::Duration;

/// All governance metrics, bundled so they can be stored in a single
/// [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Verifications by producer and outcome.
    pub verifications_total: CounterVec,
    /// Consensus anomalies by producer and class.
    pub anomalies_total: CounterVec,
    /// Transitions into `degraded` per producer.
    pub degradations_total: CounterVec,
    /// Treatment executions by treatment id and final status.
    pub treatments_total: CounterVec,
    /// Wall-clock duration of `process` calls.
    pub process_duration: Histogram,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> GovernanceError {
    GovernanceError::Other(format!("metrics init failed: {e}"))
}

/// Initialise all metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`GovernanceError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), GovernanceError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let verifications_total = CounterVec::new(
        Opts::new(
            "governance_verifications_total",
            "Output verifications by producer and outcome",
        ),
        &["producer", "outcome"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(verifications_total.clone()))
        .map_err(init_err)?;

    let anomalies_total = CounterVec::new(
        Opts::new(
            "governance_anomalies_total",
            "Consensus anomalies by producer and class",
        ),
        &["producer", "class"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(anomalies_total.clone()))
        .map_err(init_err)?;

    let degradations_total = CounterVec::new(
        Opts::new(
            "governance_degradations_total",
            "Producer transitions into degraded health",
        ),
        &["producer"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(degradations_total.clone()))
        .map_err(init_err)?;

    let treatments_total = CounterVec::new(
        Opts::new(
            "governance_treatments_total",
            "Treatment executions by treatment and final status",
        ),
        &["treatment", "status"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(treatments_total.clone()))
        .map_err(init_err)?;

    let process_duration = Histogram::with_opts(HistogramOpts::new(
        "governance_process_duration_seconds",
        "Wall-clock duration of one governed request",
    ))
    .map_err(init_err)?;
    registry
        .register(Box::new(process_duration.clone()))
        .map_err(init_err)?;

    // If another thread raced us, the first one wins. Both initializations
    // produce identical metric descriptors.
    let _ = METRICS.set(Metrics {
        registry,
        verifications_total,
        anomalies_total,
        degradations_total,
        treatments_total,
        process_duration,
    });

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Count one verification for `producer` ending in `outcome`.
pub fn inc_verification(producer: &str, outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .verifications_total
            .get_metric_with_label_values(&[producer, outcome])
        {
            c.inc();
        }
    }
}

/// Count one consensus anomaly.
pub fn inc_anomaly(producer: &str, class: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .anomalies_total
            .get_metric_with_label_values(&[producer, class])
        {
            c.inc();
        }
    }
}

/// Count one transition into `degraded`.
pub fn inc_degradation(producer: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.degradations_total.get_metric_with_label_values(&[producer]) {
            c.inc();
        }
    }
}

/// Count one treatment execution that ended in `status`.
pub fn inc_treatment(treatment: &str, status: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .treatments_total
            .get_metric_with_label_values(&[treatment, status])
        {
            c.inc();
        }
    }
}

/// Observe the duration of one `process` call.
pub fn record_process_duration(d: Duration) {
    if let Some(m) = metrics() {
        m.process_duration.observe(d.as_secs_f64());
    }
}

/// Render all metrics in Prometheus text exposition format.
///
/// Returns an empty string if metrics were never initialised or encoding
/// fails.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&m.registry.gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_gather_contains_counters_after_increment() {
        init_metrics().unwrap();
        inc_verification("metrics-test", "accepted");
        inc_treatment("metrics-test-treatment", "completed");
        let out = gather_metrics();
        assert!(out.contains("governance_verifications_total"));
        assert!(out.contains("metrics-test-treatment"));
    }

    #[test]
    fn test_helpers_never_panic() {
        inc_anomaly("x", "low_consensus");
        inc_degradation("x");
        record_process_duration(Duration::from_millis(3));
    }
}
