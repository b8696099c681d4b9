//! # Health Tracker
//!
//! ## Responsibility
//! Per-producer state machine driven by self-check failures:
//! `healthy → degraded → (recovery action) → degraded until re-evaluated → healthy`.
//!
//! ## Guarantees
//! - The consecutive-error counter only ever increments, except when a
//!   recovery action resets it to zero
//! - Successful self-checks leave the counter untouched
//! - Exactly one recovery action runs per threshold crossing
//! - Recovery never clears `Degraded`; only [`HealthTracker::reevaluate`] does
//!
//! ## NOT Responsible For
//! - Locking: callers hand in the producer's state under its own mutex
//! - Choosing remedies (that belongs to `treatment`)

use tracing::warn;

use crate::audit::AuditLog;
use crate::metrics;
use crate::producer::{HealthStatus, ProducerState};

/// Result of feeding one self-check failure into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// Counter incremented, threshold not reached.
    Counted {
        /// Counter value after the increment.
        consecutive_errors: u32,
    },
    /// Threshold reached: the producer is now degraded and a recovery action
    /// reset the counter.
    DegradedAndRecovered {
        /// Total recovery actions for this producer, including this one.
        recovery_count: u32,
    },
}

/// Applies the health state machine to producer records.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    degrade_after: u32,
}

impl HealthTracker {
    /// Tracker that degrades a producer after `degrade_after` consecutive
    /// self-check failures. Values below 1 are treated as 1.
    pub fn new(degrade_after: u32) -> Self {
        Self {
            degrade_after: degrade_after.max(1),
        }
    }

    /// Configured threshold.
    pub fn degrade_after(&self) -> u32 {
        self.degrade_after
    }

    /// Record one invalid self-check for `producer`.
    pub fn on_invalid(
        &self,
        producer: &str,
        state: &mut ProducerState,
        audit: &AuditLog,
    ) -> HealthTransition {
        state.consecutive_errors += 1;

        if state.consecutive_errors < self.degrade_after {
            return HealthTransition::Counted {
                consecutive_errors: state.consecutive_errors,
            };
        }

        state.health = HealthStatus::Degraded;
        warn!(
            producer = %producer,
            consecutive_errors = state.consecutive_errors,
            "producer degraded"
        );
        audit.record(format!(
            "ALERT: {producer} degraded after {} consecutive invalid outputs",
            state.consecutive_errors
        ));
        metrics::inc_degradation(producer);

        Self::recover(producer, state, audit);
        HealthTransition::DegradedAndRecovered {
            recovery_count: state.recovery_count,
        }
    }

    /// Recovery action: reset the counter. Health stays as it is.
    fn recover(producer: &str, state: &mut ProducerState, audit: &AuditLog) {
        state.consecutive_errors = 0;
        state.recovery_count += 1;
        audit.record(format!("RECOVERY: restarting {producer}"));
    }

    /// External health re-evaluation. The only path from `Degraded` back to
    /// `Healthy`. Returns the resulting status.
    pub fn reevaluate(
        &self,
        producer: &str,
        state: &mut ProducerState,
        healthy: bool,
        audit: &AuditLog,
    ) -> HealthStatus {
        let next = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        if state.health != next {
            audit.record(format!(
                "HEALTH: {producer} re-evaluated {:?} -> {next:?}",
                state.health
            ));
            state.health = next;
        }
        next
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(3)
    }
}
