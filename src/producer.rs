//! # Producer registry
//!
//! ## Responsibility
//! Hold one registration record per governed producer: its identity, kind,
//! bound validator, declared capabilities, and the mutable health and
//! performance state the rest of the engine updates.
//!
//! ## Guarantees
//! - Records are created on registration and never removed or replaced
//! - Each record guards its mutable state with its own mutex, so updates to
//!   one producer never contend with another
//! - Capabilities are resolved once, at registration, and never re-probed
//!
//! ## NOT Responsible For
//! - Deciding what a failure means (that belongs to `health`)
//! - Cross-checking outputs (that belongs to `consensus`)

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Validator capability ────────────────────────────────────────────────────

/// Verdict returned by a validator for a single output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the output is acceptable.
    pub valid: bool,
    /// Why the validator reached this verdict.
    pub reason: String,
}

impl Verdict {
    /// An accepting verdict.
    pub fn valid(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            reason: reason.into(),
        }
    }

    /// A rejecting verdict.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }
}

/// Operations a validator declares support for.
///
/// Read once when the producer is registered and stored on the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorCapabilities {
    /// Whether this validator may be consulted to review *other* producers'
    /// outputs during cross-checking.
    pub peer_review: bool,
}

impl Default for ValidatorCapabilities {
    fn default() -> Self {
        Self { peer_review: true }
    }
}

/// Validator bound to a producer at registration.
///
/// Must be pure from the engine's point of view: the same output always gets
/// the same verdict and no state is mutated. "Invalid" is an expected
/// outcome and is expressed as a [`Verdict`], never as an error.
pub trait Validator: Send + Sync {
    /// Judge a single output.
    fn validate(&self, output: &str) -> Verdict;

    /// Declare supported operations. Defaults to full support.
    fn capabilities(&self) -> ValidatorCapabilities {
        ValidatorCapabilities::default()
    }
}

impl<F> Validator for F
where
    F: Fn(&str) -> Verdict + Send + Sync,
{
    fn validate(&self, output: &str) -> Verdict {
        self(output)
    }
}

// ─── Producer call ───────────────────────────────────────────────────────────

/// Errors a producer call can return.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The producer could not produce an output for this input.
    #[error("producer call failed: {0}")]
    Failed(String),
}

/// A source of candidate outputs, invoked once per request in chain order.
///
/// The name must match the name the producer was registered under; the
/// governance engine uses it to find the bound validator.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Registered name of this producer.
    fn name(&self) -> &str;

    /// Produce an output for `input`.
    async fn produce(&self, input: &str) -> Result<String, ProducerError>;
}

/// Adapter turning a synchronous closure into a [`Producer`].
pub struct FnProducer<F> {
    name: String,
    f: F,
}

impl<F> FnProducer<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    /// Wrap `f` under the given producer name.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Producer for FnProducer<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, input: &str) -> Result<String, ProducerError> {
        Ok((self.f)(input))
    }
}

// ─── Health and performance ──────────────────────────────────────────────────

/// Health classification of a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Crossed the consecutive-failure threshold; stays here until an
    /// explicit health re-evaluation clears it.
    Degraded,
}

/// Rolling performance figures for one producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Fraction of verifications accepted, in `[0, 1]`.
    pub accuracy: f64,
    /// Latency of the most recent producer call, in milliseconds.
    pub response_time_ms: f64,
    /// Fraction of verifications that failed the producer's own validator.
    pub error_rate: f64,
}

/// How one verification ended, from the producer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Output passed every check.
    Accepted,
    /// Output was rejected by the producer's own validator.
    SelfCheckFailed,
    /// Output passed self-check but peers disagreed.
    Anomalous,
}

/// Mutable state of a producer record.
///
/// Only the governance engine writes it: the counter moves through
/// [`HealthTracker::on_invalid`](crate::health::HealthTracker::on_invalid)
/// and its recovery step, health through the same path or an explicit
/// re-evaluation. Callers outside the crate read it via
/// [`ProducerRecord::snapshot`].
///
/// ```compile_fail
/// use std::sync::Arc;
/// use governance_orchestrator::producer::{ProducerRegistry, Verdict};
///
/// let reg = ProducerRegistry::new();
/// let rec = reg
///     .register("p", "llm", Arc::new(|_: &str| Verdict::valid("ok")))
///     .unwrap();
/// rec.state().consecutive_errors = 0;
/// ```
#[derive(Debug, Clone)]
pub struct ProducerState {
    pub(crate) health: HealthStatus,
    /// Consecutive self-check failures since the last recovery action.
    /// Only a recovery action resets it.
    pub(crate) consecutive_errors: u32,
    pub(crate) recovery_count: u32,
    pub(crate) performance: PerformanceSnapshot,
    pub(crate) last_check: Option<DateTime<Utc>>,
    checks: u64,
    accepted: u64,
    self_check_failures: u64,
}

impl ProducerState {
    fn new() -> Self {
        Self {
            health: HealthStatus::Healthy,
            consecutive_errors: 0,
            recovery_count: 0,
            performance: PerformanceSnapshot::default(),
            last_check: None,
            checks: 0,
            accepted: 0,
            self_check_failures: 0,
        }
    }

    /// Fold one verification outcome into the performance figures. Never
    /// touches health or the consecutive-error counter.
    pub(crate) fn note_check(&mut self, outcome: CheckOutcome) {
        self.checks += 1;
        match outcome {
            CheckOutcome::Accepted => self.accepted += 1,
            CheckOutcome::SelfCheckFailed => self.self_check_failures += 1,
            CheckOutcome::Anomalous => {}
        }
        let checks = self.checks as f64;
        self.performance.accuracy = self.accepted as f64 / checks;
        self.performance.error_rate = self.self_check_failures as f64 / checks;
        self.last_check = Some(Utc::now());
    }

    /// Record the latency of the most recent producer call.
    pub(crate) fn note_latency(&mut self, latency_ms: f64) {
        self.performance.response_time_ms = latency_ms;
    }

    /// Current health classification.
    pub fn health(&self) -> HealthStatus {
        self.health
    }

    /// Consecutive self-check failures since the last recovery action.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Recovery actions taken so far.
    pub fn recovery_count(&self) -> u32 {
        self.recovery_count
    }

    /// Performance figures.
    pub fn performance(&self) -> PerformanceSnapshot {
        self.performance
    }

    /// When the producer was last verified.
    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.last_check
    }

    /// Total verifications recorded.
    pub fn checks(&self) -> u64 {
        self.checks
    }
}

// ─── Registration record ─────────────────────────────────────────────────────

/// One registered producer.
pub struct ProducerRecord {
    name: String,
    kind: String,
    validator: Arc<dyn Validator>,
    capabilities: ValidatorCapabilities,
    state: Mutex<ProducerState>,
}

impl ProducerRecord {
    fn new(name: String, kind: String, validator: Arc<dyn Validator>) -> Self {
        let capabilities = validator.capabilities();
        Self {
            name,
            kind,
            validator,
            capabilities,
            state: Mutex::new(ProducerState::new()),
        }
    }

    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form kind tag supplied at registration.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Capabilities resolved at registration.
    pub fn capabilities(&self) -> ValidatorCapabilities {
        self.capabilities
    }

    /// Run the bound validator.
    pub fn validate(&self, output: &str) -> Verdict {
        self.validator.validate(output)
    }

    /// Exclusive access to the mutable state. Single writer per producer.
    pub(crate) fn state(&self) -> parking_lot::MutexGuard<'_, ProducerState> {
        self.state.lock()
    }

    /// Read-only view of this record.
    pub fn snapshot(&self) -> ProducerSnapshot {
        let state = self.state.lock();
        ProducerSnapshot {
            name: self.name.clone(),
            kind: self.kind.clone(),
            health: state.health,
            consecutive_errors: state.consecutive_errors,
            recovery_count: state.recovery_count,
            performance: state.performance,
            last_check: state.last_check,
            capabilities: self.capabilities,
        }
    }
}

impl std::fmt::Debug for ProducerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerRecord")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a producer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerSnapshot {
    /// Registered name.
    pub name: String,
    /// Kind tag.
    pub kind: String,
    /// Current health.
    pub health: HealthStatus,
    /// Consecutive self-check failures since the last recovery.
    pub consecutive_errors: u32,
    /// Recovery actions taken so far.
    pub recovery_count: u32,
    /// Performance figures.
    pub performance: PerformanceSnapshot,
    /// Last verification time.
    pub last_check: Option<DateTime<Utc>>,
    /// Declared capabilities.
    pub capabilities: ValidatorCapabilities,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Errors produced by the producer registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A producer with this name is already registered.
    #[error("producer already registered: {0}")]
    DuplicateProducer(String),
}

/// Name-ordered set of producer records.
#[derive(Debug, Default)]
pub struct ProducerRegistry {
    producers: RwLock<BTreeMap<String, Arc<ProducerRecord>>>,
}

impl ProducerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a producer.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateProducer`] if the name is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        kind: impl Into<String>,
        validator: Arc<dyn Validator>,
    ) -> Result<Arc<ProducerRecord>, RegistryError> {
        let name = name.into();
        let mut producers = self.producers.write();
        if producers.contains_key(&name) {
            return Err(RegistryError::DuplicateProducer(name));
        }
        let record = Arc::new(ProducerRecord::new(name.clone(), kind.into(), validator));
        producers.insert(name, Arc::clone(&record));
        Ok(record)
    }

    /// Look up a record by name.
    pub fn get(&self, name: &str) -> Option<Arc<ProducerRecord>> {
        self.producers.read().get(name).cloned()
    }

    /// Every record except `name`, in name order.
    pub fn peers_of(&self, name: &str) -> Vec<Arc<ProducerRecord>> {
        self.producers
            .read()
            .iter()
            .filter(|(k, _)| k.as_str() != name)
            .map(|(_, v)| Arc::clone(v))
            .collect()
    }

    /// Number of registered producers.
    pub fn len(&self) -> usize {
        self.producers.read().len()
    }

    /// Whether no producers are registered.
    pub fn is_empty(&self) -> bool {
        self.producers.read().is_empty()
    }

    /// Snapshots of every record, in name order.
    pub fn snapshots(&self) -> Vec<ProducerSnapshot> {
        let records: Vec<_> = self.producers.read().values().cloned().collect();
        records.iter().map(|r| r.snapshot()).collect()
    }
}
