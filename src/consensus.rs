//! # Consensus Verifier
//!
//! ## Responsibility
//! Check a producer's output against its own validator and, when peers are
//! registered, against every peer validator, then decide whether the peers
//! agree strongly enough for the output to be trusted.
//!
//! ## Guarantees
//! - Self-check failure short-circuits: no peer is consulted
//! - Peers judge independently; no validator sees another's verdict
//! - `agreement_rate` is exactly `valid peer verdicts / peers consulted`
//! - Anomaly iff `agreement_rate < threshold` (strict)
//! - No I/O: the only side effects are audit entries and health updates
//!
//! ## NOT Responsible For
//! - Invoking producers (that belongs to `orchestrator`)
//! - Remediating anomalies (that belongs to `treatment`)

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::audit::AuditLog;
use crate::config::ConsensusConfig;
use crate::health::HealthTracker;
use crate::metrics;
use crate::producer::{CheckOutcome, ProducerRecord, ProducerRegistry};

/// Reason reported when peers disagree with an output.
pub const ANOMALY_REASON: &str = "anomaly_detected";

/// Errors produced by verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Verification was requested for a producer that was never registered.
    #[error("producer not registered: {0}")]
    UnregisteredProducer(String),
}

/// Outcome of cross-checking an output with peer validators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusReport {
    /// Fraction of consulted peers that judged the output valid.
    pub agreement_rate: f64,
    /// Whether agreement fell below the threshold.
    pub anomaly_detected: bool,
    /// Threshold applied.
    pub threshold_used: f64,
    /// Number of peer validators consulted.
    pub peers_consulted: usize,
}

/// Severity class of a consensus anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyClass {
    /// Peers overwhelmingly reject the output; rollback candidate.
    SevereDisagreement,
    /// Peers partly reject the output; feedback required.
    LowConsensus,
}

impl AnomalyClass {
    /// Stable label used in metrics and audit entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyClass::SevereDisagreement => "severe_disagreement",
            AnomalyClass::LowConsensus => "low_consensus",
        }
    }
}

/// Result of verifying one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the output can be trusted.
    pub valid: bool,
    /// Validator reason, `"anomaly_detected"`, or `"verified"`.
    pub reason: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Present when a cross-check ran.
    pub consensus: Option<ConsensusReport>,
    /// Present when the cross-check flagged an anomaly.
    pub anomaly: Option<AnomalyClass>,
}

/// Runs self-checks and peer cross-checks.
#[derive(Debug, Clone)]
pub struct ConsensusVerifier {
    threshold: f64,
    severe_below: f64,
    nominal_confidence: f64,
    health: HealthTracker,
}

impl ConsensusVerifier {
    /// Build a verifier from consensus settings and a health tracker.
    pub fn new(cfg: &ConsensusConfig, health: HealthTracker) -> Self {
        Self {
            threshold: cfg.threshold,
            severe_below: cfg.severe_disagreement_below,
            nominal_confidence: cfg.nominal_confidence,
            health,
        }
    }

    /// Configured anomaly threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Health tracker applied on self-check failures.
    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Verify `output` from `producer`.
    ///
    /// # Errors
    /// Returns [`VerifyError::UnregisteredProducer`] if `producer` is unknown.
    pub fn verify(
        &self,
        registry: &ProducerRegistry,
        audit: &AuditLog,
        producer: &str,
        output: &str,
    ) -> Result<VerificationResult, VerifyError> {
        let record = registry
            .get(producer)
            .ok_or_else(|| VerifyError::UnregisteredProducer(producer.to_string()))?;

        // Step 1: self-check.
        let verdict = record.validate(output);
        if !verdict.valid {
            let mut state = record.state();
            state.note_check(CheckOutcome::SelfCheckFailed);
            self.health.on_invalid(producer, &mut state, audit);
            drop(state);

            debug!(producer = %producer, reason = %verdict.reason, "self-check failed");
            metrics::inc_verification(producer, "self_check_failed");
            return Ok(VerificationResult {
                valid: false,
                reason: verdict.reason,
                confidence: 0.0,
                consensus: None,
                anomaly: None,
            });
        }

        // Step 2: cross-check with peers that accept review duty.
        let report = if registry.len() >= 2 {
            let peers: Vec<_> = registry
                .peers_of(producer)
                .into_iter()
                .filter(|p| p.capabilities().peer_review)
                .collect();
            if peers.is_empty() {
                None
            } else {
                let agreeing = peers.iter().filter(|p| p.validate(output).valid).count();
                let agreement_rate = agreeing as f64 / peers.len() as f64;
                Some(ConsensusReport {
                    agreement_rate,
                    anomaly_detected: agreement_rate < self.threshold,
                    threshold_used: self.threshold,
                    peers_consulted: peers.len(),
                })
            }
        } else {
            None
        };

        if let Some(report) = report.filter(|r| r.anomaly_detected) {
            let class = self.classify(report.agreement_rate);
            self.record_anomaly(&record, audit, &report, class);
            return Ok(VerificationResult {
                valid: false,
                reason: ANOMALY_REASON.to_string(),
                confidence: report.agreement_rate,
                consensus: Some(report),
                anomaly: Some(class),
            });
        }

        record.state().note_check(CheckOutcome::Accepted);
        metrics::inc_verification(producer, "accepted");
        Ok(VerificationResult {
            valid: true,
            reason: "verified".to_string(),
            confidence: self.nominal_confidence,
            consensus: report,
            anomaly: None,
        })
    }

    /// Severity class for an anomalous agreement rate.
    pub fn classify(&self, agreement_rate: f64) -> AnomalyClass {
        if agreement_rate < self.severe_below {
            AnomalyClass::SevereDisagreement
        } else {
            AnomalyClass::LowConsensus
        }
    }

    fn record_anomaly(
        &self,
        record: &ProducerRecord,
        audit: &AuditLog,
        report: &ConsensusReport,
        class: AnomalyClass,
    ) {
        let producer = record.name();
        // Audit appends happen under the producer's lock so they stay
        // ordered with its health updates.
        let mut state = record.state();
        state.note_check(CheckOutcome::Anomalous);

        warn!(
            producer = %producer,
            agreement_rate = report.agreement_rate,
            threshold = report.threshold_used,
            class = class.as_str(),
            "consensus anomaly"
        );
        audit.record(format!(
            "ANOMALY: {producer} - consensus {:.2}%",
            report.agreement_rate * 100.0
        ));
        match class {
            AnomalyClass::SevereDisagreement => {
                audit.record(format!("ROLLBACK: {producer} - severe disagreement"))
            }
            AnomalyClass::LowConsensus => audit.record(format!(
                "FEEDBACK: {producer} - review required (low consensus)"
            )),
        }
        metrics::inc_anomaly(producer, class.as_str());
        metrics::inc_verification(producer, "anomaly");
    }
}

impl Default for ConsensusVerifier {
    fn default() -> Self {
        Self::new(&ConsensusConfig::default(), HealthTracker::default())
    }
}
