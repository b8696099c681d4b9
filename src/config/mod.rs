//! # Governance Configuration
//!
//! ## Responsibility
//! Define the TOML configuration schema for a governance deployment, with a
//! documented default for every field, and export it as JSON Schema.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `GovernanceConfig`
//! - Complete defaults: an empty document is a valid configuration
//! - Validated: semantic constraints are checked by [`validation::validate`]
//!
//! ## NOT Responsible For
//! - Reading files (that belongs to `loader`)
//! - Applying the configuration (that belongs to `orchestrator`)

pub mod loader;
pub mod validation;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::treatment::TreatmentMode;

// ── Default value functions ──────────────────────────────────────────────

fn default_threshold() -> f64 {
    0.7
}

fn default_severe_below() -> f64 {
    0.3
}

fn default_nominal_confidence() -> f64 {
    0.95
}

fn default_degrade_after() -> u32 {
    3
}

fn default_trend_window() -> usize {
    10
}

fn default_improving_above() -> f64 {
    0.1
}

fn default_declining_below() -> f64 {
    -0.1
}

fn default_true() -> bool {
    true
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for one governance deployment.
///
/// # Example
///
/// ```toml
/// [consensus]
/// threshold = 0.7
///
/// [treatment]
/// mode = "autonomous"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Cross-validation settings.
    pub consensus: ConsensusConfig,
    /// Health state machine settings.
    pub health: HealthConfig,
    /// Audit trail retention.
    pub audit: AuditConfig,
    /// Trend analysis settings.
    pub self_exam: SelfExamConfig,
    /// Treatment approval settings.
    pub treatment: TreatmentConfig,
    /// Logging output.
    pub observability: ObservabilityConfig,
}

/// Cross-validation settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ConsensusConfig {
    /// An output is anomalous when peer agreement is strictly below this.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Anomalies with agreement strictly below this are classed as severe
    /// disagreement (rollback candidates); others as low consensus.
    #[serde(default = "default_severe_below")]
    pub severe_disagreement_below: f64,
    /// Confidence reported for accepted outputs.
    #[serde(default = "default_nominal_confidence")]
    pub nominal_confidence: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            severe_disagreement_below: default_severe_below(),
            nominal_confidence: default_nominal_confidence(),
        }
    }
}

/// Health state machine settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive invalid self-checks before a producer is degraded.
    #[serde(default = "default_degrade_after")]
    pub degrade_after_consecutive_errors: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degrade_after_consecutive_errors: default_degrade_after(),
        }
    }
}

/// Audit trail retention.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum retained entries; `0` keeps everything.
    pub max_entries: usize,
}

impl AuditConfig {
    /// Retention cap, `None` when unbounded.
    pub fn retention(&self) -> Option<usize> {
        (self.max_entries > 0).then_some(self.max_entries)
    }
}

/// Trend analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct SelfExamConfig {
    /// Most recent samples per metric considered for a trend.
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    /// Relative change strictly above this is `improving`.
    #[serde(default = "default_improving_above")]
    pub improving_above: f64,
    /// Relative change strictly below this is `declining`.
    #[serde(default = "default_declining_below")]
    pub declining_below: f64,
    /// List issues with no canned remedy under `unclassified`.
    #[serde(default = "default_true")]
    pub surface_unclassified_issues: bool,
}

impl Default for SelfExamConfig {
    fn default() -> Self {
        Self {
            trend_window: default_trend_window(),
            improving_above: default_improving_above(),
            declining_below: default_declining_below(),
            surface_unclassified_issues: true,
        }
    }
}

/// Treatment approval settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct TreatmentConfig {
    /// `human_in_loop` (default) or `autonomous`.
    pub mode: TreatmentMode,
}

/// Logging output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `"pretty"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
        }
    }
}

/// Export the JSON Schema for `GovernanceConfig`.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(GovernanceConfig);
    serde_json::to_string_pretty(&schema)
}
