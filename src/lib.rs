//! # governance-orchestrator
//!
//! Governance, self-diagnosis and treatment decisions for a fleet of
//! independently operating AI response producers.
//!
//! ## Architecture
//!
//! ```text
//! request ─► producer chain (sequential) ─► ConsensusVerifier ─┬─► accepted results
//!                                                               └─► HealthTracker (invalid)
//!          aggregate metrics ─► SelfExamination ─► Diagnosis ─► TreatmentOrchestrator
//!                                                                    │
//!                        TreatmentCatalog effectiveness ◄── handler outcomes
//! ```
//!
//! All shared state lives in one [`GovernanceOrchestrator`] instance; there
//! are no process-wide registries.

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod audit;
pub mod config;
pub mod consensus;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod producer;
pub mod self_exam;
pub mod treatment;

// Re-exports for convenience
pub use audit::{AuditEntry, AuditLog};
pub use config::GovernanceConfig;
pub use consensus::{
    AnomalyClass, ConsensusReport, ConsensusVerifier, VerificationResult, VerifyError,
};
pub use health::{HealthTracker, HealthTransition};
pub use orchestrator::{
    AcceptedOutput, GovernanceOrchestrator, HealthReport, ProcessOutcome, RejectedOutput,
    RemediationProposal, RequestMetrics,
};
pub use producer::{
    FnProducer, HealthStatus, PerformanceSnapshot, Producer, ProducerError, ProducerSnapshot,
    RegistryError, Validator, ValidatorCapabilities, Verdict,
};
pub use self_exam::{Diagnosis, ImprovementPlan, SelfAnalysis, SelfExamination, Trend};
pub use treatment::{
    handler_fn, ApprovedTreatment, Approver, ConditionSeverity, ContainmentTier, ExecutionStatus,
    RiskLevel, TreatmentCatalog, TreatmentError, TreatmentHandler, TreatmentMode, TreatmentOption,
    TreatmentOrchestrator, TreatmentRecord,
};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`GovernanceError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), GovernanceError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    init_tracing_with_format(&format)
}

/// Initialise the global tracing subscriber with an explicit format
/// (`"json"` or `"pretty"`), e.g. taken from
/// [`config::ObservabilityConfig::log_format`].
///
/// # Errors
///
/// Returns [`GovernanceError::Other`] if a global subscriber is already set.
pub fn init_tracing_with_format(format: &str) -> Result<(), GovernanceError> {
    let result = match format {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| GovernanceError::Other(format!("tracing init failed: {e}")))
}

/// Top-level governance errors.
///
/// Only structurally invalid calls surface here. Quality problems with
/// producer output (invalid verdicts, consensus anomalies, handler failures)
/// are reported as values, never as errors.
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Verification was requested for a producer that is not registered.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Producer registration was rejected.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A treatment could not be executed.
    #[error(transparent)]
    Treatment(#[from] TreatmentError),

    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] config::validation::ConfigError),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
