//! # Governance Orchestrator
//!
//! ## Responsibility
//! Own every piece of governance state for one deployment (producer
//! registry, audit log, self-examination history, treatment workflow) and
//! sequence requests through a chain of producers.
//!
//! ## Guarantees
//! - Producers in a chain run strictly one after another; each output is
//!   verified before the next producer is invoked
//! - `process` never fails for output-quality problems: rejected outputs are
//!   logged and skipped, and the call always returns results plus metrics
//! - `success_rate` is `0.0` for an empty chain
//! - `health_report` is always available, even with no producers
//!
//! ## NOT Responsible For
//! - Implementing producers or handlers (callers supply them)
//! - Transport, auth, or persistence

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};

use crate::audit::AuditLog;
use crate::config::GovernanceConfig;
use crate::consensus::{AnomalyClass, ConsensusVerifier, VerificationResult, VerifyError};
use crate::health::HealthTracker;
use crate::metrics;
use crate::producer::{
    HealthStatus, Producer, ProducerRegistry, ProducerSnapshot, RegistryError, Validator,
};
use crate::self_exam::{Diagnosis, SelfAnalysis, SelfExamination, Trend};
use crate::treatment::{
    ConditionSeverity, ExecutionStatus, TreatmentCatalog, TreatmentError, TreatmentOption,
    TreatmentOrchestrator, TreatmentRecord,
};
use crate::GovernanceError;

/// Diagnosed metric → catalog condition used by remediation planning.
const METRIC_CONDITIONS: &[(&str, &str)] = &[
    ("response_time", "latency_degradation"),
    ("success_rate", "output_rejection"),
    ("error_rate", "validation_faults"),
    ("accuracy", "output_rejection"),
];

// ─── Reports ─────────────────────────────────────────────────────────────────

/// A producer output that passed verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedOutput {
    /// Producer name.
    pub producer: String,
    /// The output.
    pub output: String,
    /// Verification confidence.
    pub confidence: f64,
    /// Producer call latency in milliseconds.
    pub latency_ms: f64,
}

/// A producer output that was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedOutput {
    /// Producer name.
    pub producer: String,
    /// Why it was skipped.
    pub reason: String,
    /// Anomaly class, when peers disagreed.
    pub anomaly: Option<AnomalyClass>,
}

/// Aggregate figures for one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestMetrics {
    /// Wall-clock time for the whole chain, in seconds.
    pub response_time: f64,
    /// Producers whose output was accepted.
    pub producers_accepted: usize,
    /// Producers in the chain.
    pub chain_length: usize,
    /// `producers_accepted / chain_length`, `0.0` for an empty chain.
    pub success_rate: f64,
}

/// Result of [`GovernanceOrchestrator::process`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// Short id correlating log lines and audit entries.
    pub request_id: String,
    /// Accepted outputs, in chain order.
    pub results: Vec<AcceptedOutput>,
    /// Skipped outputs, in chain order.
    pub rejected: Vec<RejectedOutput>,
    /// Aggregate figures.
    pub metrics: RequestMetrics,
    /// Self-examination after feeding `metrics`.
    pub analysis: SelfAnalysis,
    /// When the request finished.
    pub timestamp: DateTime<Utc>,
}

impl ProcessOutcome {
    /// Diagnosis from the post-request analysis.
    pub fn diagnosis(&self) -> &Diagnosis {
        &self.analysis.diagnosis
    }
}

/// Read-only snapshot for monitoring surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Seconds since the orchestrator was created.
    pub uptime_seconds: f64,
    /// Registered producers.
    pub producer_count: usize,
    /// Health per producer.
    pub governance_status: BTreeMap<String, HealthStatus>,
    /// Full per-producer view.
    pub producers: Vec<ProducerSnapshot>,
    /// Current trend per metric.
    pub performance_trend: BTreeMap<String, Trend>,
    /// Entries currently held in the audit log.
    pub audit_log_size: usize,
}

/// Candidate remedies for one diagnosed issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationProposal {
    /// The diagnosed issue, e.g. `"success_rate declining"`.
    pub issue: String,
    /// Catalog condition it maps to.
    pub condition: String,
    /// Severity carried forward to approval.
    pub severity: ConditionSeverity,
    /// Catalog options for the condition, in catalog order.
    pub options: Vec<TreatmentOption>,
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

/// Governance context for one deployment.
pub struct GovernanceOrchestrator {
    config: GovernanceConfig,
    registry: ProducerRegistry,
    audit: AuditLog,
    verifier: ConsensusVerifier,
    self_exam: SelfExamination,
    treatments: TreatmentOrchestrator,
    started: Instant,
    requests: AtomicU64,
}

impl GovernanceOrchestrator {
    /// Orchestrator with the built-in treatment catalog.
    pub fn new(config: GovernanceConfig) -> Self {
        Self::with_catalog(config, TreatmentCatalog::builtin())
    }

    /// Orchestrator with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(GovernanceConfig::default())
    }

    /// Orchestrator with a custom treatment catalog.
    pub fn with_catalog(config: GovernanceConfig, catalog: TreatmentCatalog) -> Self {
        let health = HealthTracker::new(config.health.degrade_after_consecutive_errors);
        let verifier = ConsensusVerifier::new(&config.consensus, health);
        let audit = AuditLog::with_retention(config.audit.retention());
        let self_exam = SelfExamination::new(config.self_exam.clone());
        let treatments = TreatmentOrchestrator::new(config.treatment.mode, Arc::new(catalog));
        info!(
            mode = ?config.treatment.mode,
            threshold = config.consensus.threshold,
            "governance orchestrator started"
        );
        Self {
            config,
            registry: ProducerRegistry::new(),
            audit,
            verifier,
            self_exam,
            treatments,
            started: Instant::now(),
            requests: AtomicU64::new(0),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Register a producer and its validator.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateProducer`] if the name is taken.
    pub fn register_producer(
        &self,
        name: impl Into<String>,
        kind: impl Into<String>,
        validator: Arc<dyn Validator>,
    ) -> Result<(), RegistryError> {
        let record = self.registry.register(name, kind, validator)?;
        info!(
            producer = %record.name(),
            kind = %record.kind(),
            peer_review = record.capabilities().peer_review,
            "producer registered"
        );
        self.audit
            .record(format!("REGISTERED: {} ({})", record.name(), record.kind()));
        Ok(())
    }

    /// Verify one output from a registered producer.
    ///
    /// # Errors
    /// Returns [`VerifyError::UnregisteredProducer`] if `producer` is unknown.
    pub fn verify(&self, producer: &str, output: &str) -> Result<VerificationResult, VerifyError> {
        self.verifier
            .verify(&self.registry, &self.audit, producer, output)
    }

    /// Run `input` through `chain` in order, verifying each output.
    pub async fn process(&self, input: &str, chain: &[Arc<dyn Producer>]) -> ProcessOutcome {
        let request_id = self.next_request_id(input);
        let span = info_span!("governance.process", request_id = %request_id, chain = chain.len());
        self.run_chain(request_id, input, chain).instrument(span).await
    }

    async fn run_chain(
        &self,
        request_id: String,
        input: &str,
        chain: &[Arc<dyn Producer>],
    ) -> ProcessOutcome {
        let start = Instant::now();
        let mut results = Vec::new();
        let mut rejected = Vec::new();

        for producer in chain {
            let name = producer.name().to_string();
            let call_start = Instant::now();
            let produced = producer.produce(input).await;
            let latency_ms = call_start.elapsed().as_secs_f64() * 1000.0;

            let output = match produced {
                Ok(output) => output,
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        producer = %name,
                        error = %e,
                        "producer call failed"
                    );
                    rejected.push(RejectedOutput {
                        producer: name,
                        reason: e.to_string(),
                        anomaly: None,
                    });
                    continue;
                }
            };

            if let Some(record) = self.registry.get(&name) {
                record.state().note_latency(latency_ms);
            }

            match self.verify(&name, &output) {
                Ok(v) if v.valid => results.push(AcceptedOutput {
                    producer: name,
                    output,
                    confidence: v.confidence,
                    latency_ms,
                }),
                Ok(v) => {
                    warn!(
                        request_id = %request_id,
                        producer = %name,
                        reason = %v.reason,
                        "invalid output skipped"
                    );
                    rejected.push(RejectedOutput {
                        producer: name,
                        reason: v.reason,
                        anomaly: v.anomaly,
                    });
                }
                Err(e) => {
                    error!(
                        request_id = %request_id,
                        producer = %name,
                        error = %e,
                        "verification refused"
                    );
                    rejected.push(RejectedOutput {
                        producer: name,
                        reason: e.to_string(),
                        anomaly: None,
                    });
                }
            }
        }

        let elapsed = start.elapsed();
        let accepted = results.len();
        let success_rate = if chain.is_empty() {
            0.0
        } else {
            accepted as f64 / chain.len() as f64
        };
        let request_metrics = RequestMetrics {
            response_time: elapsed.as_secs_f64(),
            producers_accepted: accepted,
            chain_length: chain.len(),
            success_rate,
        };
        metrics::record_process_duration(elapsed);

        let analysis = self.self_exam.record_metrics([
            ("response_time", request_metrics.response_time),
            ("producers_accepted", accepted as f64),
            ("success_rate", success_rate),
        ]);

        info!(
            request_id = %request_id,
            accepted,
            rejected = rejected.len(),
            success_rate,
            "request processed"
        );

        ProcessOutcome {
            request_id,
            results,
            rejected,
            metrics: request_metrics,
            analysis,
            timestamp: Utc::now(),
        }
    }

    fn next_request_id(&self, input: &str) -> String {
        let seq = self.requests.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mut hasher = DefaultHasher::new();
        input.hash(&mut hasher);
        nanos.hash(&mut hasher);
        seq.hash(&mut hasher);
        format!("{:08x}", hasher.finish() & 0xffff_ffff)
    }

    /// Snapshot of producer health, trends, and audit size.
    pub fn health_report(&self) -> HealthReport {
        let producers = self.registry.snapshots();
        HealthReport {
            timestamp: Utc::now(),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            producer_count: producers.len(),
            governance_status: producers
                .iter()
                .map(|p| (p.name.clone(), p.health))
                .collect(),
            producers,
            performance_trend: self.self_exam.trends(),
            audit_log_size: self.audit.len(),
        }
    }

    /// External health re-evaluation for one producer. This is the only way
    /// a degraded producer becomes healthy again.
    ///
    /// # Errors
    /// Returns [`VerifyError::UnregisteredProducer`] if `producer` is unknown.
    pub fn reevaluate_health(
        &self,
        producer: &str,
        healthy: bool,
    ) -> Result<HealthStatus, VerifyError> {
        let record = self
            .registry
            .get(producer)
            .ok_or_else(|| VerifyError::UnregisteredProducer(producer.to_string()))?;
        let mut state = record.state();
        Ok(self
            .verifier
            .health()
            .reevaluate(producer, &mut state, healthy, &self.audit))
    }

    /// Snapshot of one producer.
    pub fn producer(&self, name: &str) -> Option<ProducerSnapshot> {
        self.registry.get(name).map(|r| r.snapshot())
    }

    /// Audit trail.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Self-examination engine.
    pub fn self_exam(&self) -> &SelfExamination {
        &self.self_exam
    }

    /// Treatment workflow.
    pub fn treatments(&self) -> &TreatmentOrchestrator {
        &self.treatments
    }

    /// Map each diagnosed issue to a catalog condition and its options.
    /// Issues on metrics with no mapped condition are skipped.
    pub fn plan_remediation(
        &self,
        diagnosis: &Diagnosis,
        severity: ConditionSeverity,
    ) -> Vec<RemediationProposal> {
        diagnosis
            .issues
            .iter()
            .filter_map(|issue| {
                let metric = issue.strip_suffix(" declining").unwrap_or(issue);
                let (_, condition) = METRIC_CONDITIONS.iter().find(|(m, _)| *m == metric)?;
                Some(RemediationProposal {
                    issue: issue.clone(),
                    condition: (*condition).to_string(),
                    severity,
                    options: self.treatments.suggest(condition, severity),
                })
            })
            .collect()
    }

    /// Run the autonomous approval rule over every option for `condition`
    /// and execute what was approved against `target`.
    ///
    /// Returns the final record of each approved treatment. Options without
    /// a bound handler come back marked failed.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Verify`] if `target` is not registered.
    pub async fn auto_remediate(
        &self,
        target: &str,
        condition: &str,
        severity: ConditionSeverity,
    ) -> Result<Vec<TreatmentRecord>, GovernanceError> {
        if self.registry.get(target).is_none() {
            return Err(VerifyError::UnregisteredProducer(target.to_string()).into());
        }

        let mut records = Vec::new();
        for option in self.treatments.suggest(condition, severity) {
            let Some(approval) = self.treatments.autonomous_approve(&option, target, severity)
            else {
                continue;
            };
            match self.treatments.execute(&approval).await {
                Ok(_) | Err(TreatmentError::NoHandler { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            if let Some(record) = self.treatments.record(approval.id()) {
                let verb = if record.execution_status == ExecutionStatus::Completed {
                    "applied"
                } else {
                    "failed"
                };
                self.audit.record(format!(
                    "TREATMENT: {} {verb} on {target} ({condition}, {severity})",
                    record.treatment_id
                ));
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl Default for GovernanceOrchestrator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for GovernanceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceOrchestrator")
            .field("producers", &self.registry.len())
            .field("audit_log_size", &self.audit.len())
            .field("treatments", &self.treatments)
            .finish_non_exhaustive()
    }
}
