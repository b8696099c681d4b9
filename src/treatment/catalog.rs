//! # Treatment Catalog
//!
//! ## Responsibility
//! Map condition names to an ordered list of candidate remedies, and keep a
//! running record of how well each remedy worked when executed.
//!
//! ## Guarantees
//! - Catalog entries are authored data, immutable once built
//! - Unknown conditions yield an empty list, never an error
//! - Effectiveness updates are per treatment id and never block each other
//!
//! ## NOT Responsible For
//! - Approving or executing remedies (that belongs to `orchestrator`)

use std::collections::BTreeMap;

use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Severity of isolating a producer from live traffic. Totally ordered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ContainmentTier {
    /// No isolation.
    #[default]
    None,
    /// Block access to some context data.
    ContextIsolation,
    /// Filter or limit responses.
    ResponseFiltering,
    /// Disable specific endpoints.
    EndpointMuting,
    /// Take the producer offline.
    FullDisconnection,
}

/// Risk of applying a remedy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Safe to apply routinely.
    Low,
    /// Noticeable side effects.
    Medium,
    /// Disruptive.
    High,
    /// May lose work or be irreversible.
    Critical,
}

/// A candidate remedy for a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TreatmentOption {
    /// Identifier used to bind an execution handler.
    pub id: String,
    /// Short display name.
    pub name: String,
    /// What the remedy does.
    pub description: String,
    /// Risk of applying it.
    pub risk_level: RiskLevel,
    /// Human-readable recovery estimate, e.g. `"5 minutes"`.
    pub expected_recovery_time: String,
    /// Whether the remedy can be undone.
    pub reversible: bool,
    /// Whether a human must approve it.
    pub requires_human_approval: bool,
    /// How far it isolates the target.
    pub containment_tier: ContainmentTier,
    /// Steps that must have happened first.
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

impl TreatmentOption {
    /// Option with no approval requirement, reversible, low risk and no
    /// containment. Adjust with the builder methods.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            risk_level: RiskLevel::Low,
            expected_recovery_time: "immediate".to_string(),
            reversible: true,
            requires_human_approval: false,
            containment_tier: ContainmentTier::None,
            prerequisites: Vec::new(),
        }
    }

    /// Set the risk level.
    pub fn risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    /// Set the recovery estimate.
    pub fn recovery(mut self, eta: impl Into<String>) -> Self {
        self.expected_recovery_time = eta.into();
        self
    }

    /// Mark as irreversible.
    pub fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }

    /// Require human approval.
    pub fn needs_approval(mut self) -> Self {
        self.requires_human_approval = true;
        self
    }

    /// Set the containment tier.
    pub fn containment(mut self, tier: ContainmentTier) -> Self {
        self.containment_tier = tier;
        self
    }

    /// Add a prerequisite step.
    pub fn after(mut self, prerequisite: impl Into<String>) -> Self {
        self.prerequisites.push(prerequisite.into());
        self
    }
}

/// Execution track record of one treatment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreatmentEffectiveness {
    /// Treatment id.
    pub treatment_id: String,
    /// Executions that ran the handler.
    pub attempts: u64,
    /// Executions that completed.
    pub successes: u64,
}

impl TreatmentEffectiveness {
    /// `successes / attempts`, zero before the first attempt.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Per-treatment execution outcomes.
#[derive(Debug, Default)]
pub struct EffectivenessLedger {
    stats: DashMap<String, TreatmentEffectiveness>,
}

impl EffectivenessLedger {
    /// Record one execution outcome.
    pub fn record(&self, treatment_id: &str, success: bool) {
        let mut entry = self
            .stats
            .entry(treatment_id.to_string())
            .or_insert_with(|| TreatmentEffectiveness {
                treatment_id: treatment_id.to_string(),
                ..Default::default()
            });
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        }
    }

    /// Track record for one treatment.
    pub fn get(&self, treatment_id: &str) -> Option<TreatmentEffectiveness> {
        self.stats.get(treatment_id).map(|e| e.value().clone())
    }

    /// Treatments ranked by success rate, then by attempts, then by id.
    pub fn ranked(&self, limit: usize) -> Vec<TreatmentEffectiveness> {
        let mut all: Vec<_> = self.stats.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            b.success_rate()
                .total_cmp(&a.success_rate())
                .then(b.attempts.cmp(&a.attempts))
                .then(a.treatment_id.cmp(&b.treatment_id))
        });
        all.truncate(limit);
        all
    }
}

/// Condition → ordered remedies, plus the effectiveness ledger.
#[derive(Debug, Default)]
pub struct TreatmentCatalog {
    conditions: BTreeMap<String, Vec<TreatmentOption>>,
    effectiveness: EffectivenessLedger,
}

impl TreatmentCatalog {
    /// Catalog with no conditions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in catalog.
    pub fn builtin() -> Self {
        use ContainmentTier as Tier;
        use RiskLevel as Risk;

        Self::empty()
            .with_condition(
                "dependency_compromise",
                vec![
                    TreatmentOption::new(
                        "security_scan",
                        "Run Security Scan",
                        "Audit dependencies for known vulnerabilities",
                    )
                    .recovery("15 minutes"),
                    TreatmentOption::new(
                        "isolate_module",
                        "Isolate Affected Module",
                        "Disable the module until it is patched",
                    )
                    .risk(Risk::Medium)
                    .recovery("1 hour")
                    .needs_approval()
                    .after("security_scan"),
                ],
            )
            .with_condition(
                "structural_breakage",
                vec![
                    TreatmentOption::new(
                        "repair_imports",
                        "Repair Imports",
                        "Automatically repair broken imports",
                    )
                    .recovery("5 minutes"),
                    TreatmentOption::new(
                        "run_test_suite",
                        "Run Full Test Suite",
                        "Execute all tests to verify recovery",
                    )
                    .recovery("10 minutes"),
                ],
            )
            .with_condition(
                "total_failure",
                vec![
                    TreatmentOption::new(
                        "graceful_restart",
                        "Graceful Restart",
                        "Restart all services cleanly",
                    )
                    .risk(Risk::High)
                    .recovery("2 minutes")
                    .needs_approval(),
                    TreatmentOption::new(
                        "full_reset",
                        "Full Reset",
                        "Hard reset; in-flight requests may be lost",
                    )
                    .risk(Risk::Critical)
                    .recovery("5 minutes")
                    .irreversible()
                    .needs_approval(),
                ],
            )
            .with_condition(
                "output_degradation",
                vec![
                    TreatmentOption::new(
                        "raise_temperature",
                        "Increase Response Variety",
                        "Raise the sampling temperature for more varied responses",
                    ),
                    TreatmentOption::new(
                        "adjust_system_prompt",
                        "Adjust System Prompt",
                        "Revise the system prompt to encourage better output",
                    ),
                ],
            )
            .with_condition(
                "hallucination",
                vec![
                    TreatmentOption::new(
                        "limit_context",
                        "Limit Context Window",
                        "Reduce context to curb fabricated content",
                    )
                    .risk(Risk::Medium)
                    .needs_approval()
                    .containment(Tier::ContextIsolation),
                    TreatmentOption::new(
                        "enable_response_validation",
                        "Enable Response Validation",
                        "Add a fact-checking layer in front of responses",
                    )
                    .containment(Tier::ResponseFiltering),
                ],
            )
            .with_condition(
                "overload",
                vec![
                    TreatmentOption::new(
                        "apply_rate_limit",
                        "Apply Rate Limiting",
                        "Temporarily reduce request load",
                    )
                    .recovery("1 hour")
                    .containment(Tier::ResponseFiltering),
                    TreatmentOption::new(
                        "temporary_disconnect",
                        "Temporary Disconnect",
                        "Take the producer offline to cool down",
                    )
                    .risk(Risk::Medium)
                    .recovery("30 minutes")
                    .needs_approval()
                    .containment(Tier::FullDisconnection),
                ],
            )
            .with_condition(
                "latency_degradation",
                vec![
                    TreatmentOption::new(
                        "shed_low_priority",
                        "Shed Low-Priority Traffic",
                        "Drop low-priority requests until latency recovers",
                    )
                    .recovery("10 minutes")
                    .containment(Tier::ResponseFiltering),
                    TreatmentOption::new(
                        "mute_slow_endpoint",
                        "Mute Slow Endpoint",
                        "Stop routing traffic to the slowest endpoint",
                    )
                    .risk(Risk::Medium)
                    .recovery("30 minutes")
                    .needs_approval()
                    .containment(Tier::EndpointMuting),
                ],
            )
            .with_condition(
                "output_rejection",
                vec![
                    TreatmentOption::new(
                        "tighten_output_checks",
                        "Tighten Output Checks",
                        "Route outputs through stricter validation before release",
                    )
                    .containment(Tier::ResponseFiltering),
                    TreatmentOption::new(
                        "quarantine_producer",
                        "Quarantine Producer",
                        "Remove the producer from live traffic pending review",
                    )
                    .risk(Risk::High)
                    .recovery("1 hour")
                    .needs_approval()
                    .containment(Tier::FullDisconnection),
                ],
            )
            .with_condition(
                "validation_faults",
                vec![
                    TreatmentOption::new(
                        "harden_validators",
                        "Harden Validators",
                        "Add stricter schema and content checks",
                    )
                    .recovery("15 minutes"),
                    TreatmentOption::new(
                        "isolate_producer_context",
                        "Isolate Producer Context",
                        "Cut the producer off from shared context stores",
                    )
                    .risk(Risk::Medium)
                    .needs_approval()
                    .containment(Tier::ContextIsolation),
                ],
            )
    }

    /// Add or replace the options for `condition`.
    pub fn with_condition(
        mut self,
        condition: impl Into<String>,
        options: Vec<TreatmentOption>,
    ) -> Self {
        self.conditions.insert(condition.into(), options);
        self
    }

    /// Ordered options for `condition`; empty when unknown.
    pub fn get_options(&self, condition: &str) -> Vec<TreatmentOption> {
        self.conditions.get(condition).cloned().unwrap_or_default()
    }

    /// Known condition names, sorted.
    pub fn conditions(&self) -> Vec<String> {
        self.conditions.keys().cloned().collect()
    }

    /// First option with this id, across all conditions.
    pub fn find(&self, treatment_id: &str) -> Option<TreatmentOption> {
        self.conditions
            .values()
            .flatten()
            .find(|o| o.id == treatment_id)
            .cloned()
    }

    /// Record an execution outcome.
    pub fn record_outcome(&self, treatment_id: &str, success: bool) {
        self.effectiveness.record(treatment_id, success);
    }

    /// Track record for one treatment.
    pub fn effectiveness(&self, treatment_id: &str) -> Option<TreatmentEffectiveness> {
        self.effectiveness.get(treatment_id)
    }

    /// Best-performing treatments so far.
    pub fn most_effective(&self, limit: usize) -> Vec<TreatmentEffectiveness> {
        self.effectiveness.ranked(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_containment_tiers_are_ordered() {
        assert!(ContainmentTier::None < ContainmentTier::ContextIsolation);
        assert!(ContainmentTier::ContextIsolation < ContainmentTier::ResponseFiltering);
        assert!(ContainmentTier::ResponseFiltering < ContainmentTier::EndpointMuting);
        assert!(ContainmentTier::EndpointMuting < ContainmentTier::FullDisconnection);
    }

    #[test]
    fn test_unknown_condition_is_empty() {
        assert!(TreatmentCatalog::builtin()
            .get_options("no_such_condition")
            .is_empty());
    }

    #[test]
    fn test_options_keep_authored_order() {
        let ids: Vec<_> = TreatmentCatalog::builtin()
            .get_options("total_failure")
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec!["graceful_restart", "full_reset"]);
    }

    #[test]
    fn test_builtin_ids_are_unique() {
        let catalog = TreatmentCatalog::builtin();
        let mut seen = HashSet::new();
        for condition in catalog.conditions() {
            for option in catalog.get_options(&condition) {
                assert!(seen.insert(option.id.clone()), "duplicate id {}", option.id);
            }
        }
    }

    #[test]
    fn test_irreversible_reset_requires_approval() {
        let reset = TreatmentCatalog::builtin().find("full_reset").unwrap();
        assert!(!reset.reversible);
        assert!(reset.requires_human_approval);
        assert_eq!(reset.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_with_condition_adds_custom_entry() {
        let catalog = TreatmentCatalog::empty().with_condition(
            "custom",
            vec![TreatmentOption::new("noop", "No-op", "does nothing")],
        );
        assert_eq!(catalog.get_options("custom").len(), 1);
        assert_eq!(catalog.conditions(), vec!["custom"]);
    }

    #[test]
    fn test_effectiveness_tracks_success_rate() {
        let catalog = TreatmentCatalog::builtin();
        catalog.record_outcome("security_scan", true);
        catalog.record_outcome("security_scan", false);
        catalog.record_outcome("security_scan", true);
        let e = catalog.effectiveness("security_scan").unwrap();
        assert_eq!(e.attempts, 3);
        assert_eq!(e.successes, 2);
        assert!((e.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!(catalog.effectiveness("full_reset").is_none());
    }

    #[test]
    fn test_most_effective_ranking() {
        let catalog = TreatmentCatalog::builtin();
        catalog.record_outcome("a", true);
        catalog.record_outcome("b", true);
        catalog.record_outcome("b", true);
        catalog.record_outcome("c", false);
        let ranked: Vec<_> = catalog
            .most_effective(10)
            .into_iter()
            .map(|e| e.treatment_id)
            .collect();
        assert_eq!(ranked, vec!["b", "a", "c"]);
        assert_eq!(catalog.most_effective(1).len(), 1);
    }
}
