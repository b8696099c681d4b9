//! # Treatment Orchestrator
//!
//! ## Responsibility
//! Turn catalog suggestions into approved remedies, either through a human
//! decision or the autonomous approval rule, then run each approved remedy
//! through its registered handler and record the outcome.
//!
//! ## Guarantees
//! - Autonomous approval fails closed outside `Autonomous` mode
//! - Only approvals issued by this orchestrator can be executed
//! - Execution status only moves forward: pending → executing → completed | failed
//! - An approval runs its handler at most once
//! - Two treatments for the same target never execute concurrently
//! - Handler errors and panics are captured in the record, never propagated
//! - History is append-only and kept in approval order
//!
//! ## NOT Responsible For
//! - Choosing which condition applies (that belongs to the governance orchestrator)
//! - Timeouts around handlers (callers layer them on)

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::catalog::{ContainmentTier, RiskLevel, TreatmentCatalog, TreatmentOption};
use crate::metrics;

// ─── Modes and severities ────────────────────────────────────────────────────

/// How approvals are obtained.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentMode {
    /// Every approval comes from a human decision.
    #[default]
    HumanInLoop,
    /// Mandatory-approval remedies may be auto-approved at critical severity.
    Autonomous,
}

/// Severity of a diagnosed condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSeverity {
    /// Cosmetic.
    Mild,
    /// Noticeable but contained.
    Moderate,
    /// Service is impaired.
    Severe,
    /// Service is failing.
    Critical,
}

impl ConditionSeverity {
    /// Lower-case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionSeverity::Mild => "mild",
            ConditionSeverity::Moderate => "moderate",
            ConditionSeverity::Severe => "severe",
            ConditionSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for ConditionSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a severity label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown severity: {0}")]
pub struct ParseSeverityError(pub String);

impl FromStr for ConditionSeverity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mild" => Ok(ConditionSeverity::Mild),
            "moderate" => Ok(ConditionSeverity::Moderate),
            "severe" => Ok(ConditionSeverity::Severe),
            "critical" => Ok(ConditionSeverity::Critical),
            other => Err(ParseSeverityError(other.to_string())),
        }
    }
}

/// Who approved a treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approver {
    /// A human operator.
    Human,
    /// The autonomous approval rule.
    Orchestrator,
}

// ─── Execution status ────────────────────────────────────────────────────────

/// Lifecycle of an approved treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Approved, not yet run.
    Pending,
    /// Handler is running.
    Executing,
    /// Handler returned successfully.
    Completed,
    /// Handler failed, panicked, or was missing.
    Failed,
}

impl ExecutionStatus {
    /// Whether `self → next` is a legal forward step.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Executing) | (Pending, Failed) | (Executing, Completed) | (Executing, Failed)
        )
    }

    /// `Completed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

// ─── Approvals and records ───────────────────────────────────────────────────

/// Proof that a treatment was approved by a [`TreatmentOrchestrator`].
///
/// Only the orchestrator's approval methods construct these. The live
/// execution status is kept in the orchestrator's history, keyed by [`id`](Self::id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovedTreatment {
    id: Uuid,
    option: TreatmentOption,
    target: String,
    approved_by: Approver,
    approved_at: DateTime<Utc>,
    rationale: String,
}

impl ApprovedTreatment {
    /// Approval id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The approved remedy.
    pub fn option(&self) -> &TreatmentOption {
        &self.option
    }

    /// Producer the remedy applies to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Who approved it.
    pub fn approved_by(&self) -> Approver {
        self.approved_by
    }

    /// When it was approved.
    pub fn approved_at(&self) -> DateTime<Utc> {
        self.approved_at
    }

    /// Why it was approved.
    pub fn rationale(&self) -> &str {
        &self.rationale
    }
}

/// History entry for one approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentRecord {
    /// Approval id.
    pub approval_id: Uuid,
    /// Catalog id of the remedy.
    pub treatment_id: String,
    /// Display name of the remedy.
    pub treatment_name: String,
    /// Producer the remedy applies to.
    pub target: String,
    /// Who approved it.
    pub approved_by: Approver,
    /// When it was approved.
    pub approved_at: DateTime<Utc>,
    /// Why it was approved.
    pub rationale: String,
    /// Current execution status.
    pub execution_status: ExecutionStatus,
    /// Handler output or failure text, once known.
    pub execution_result: Option<String>,
    /// When execution reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Containment tier of the remedy.
    pub containment_tier: ContainmentTier,
    /// Risk level of the remedy.
    pub risk_level: RiskLevel,
}

impl TreatmentRecord {
    fn from_approval(approval: &ApprovedTreatment) -> Self {
        Self {
            approval_id: approval.id,
            treatment_id: approval.option.id.clone(),
            treatment_name: approval.option.name.clone(),
            target: approval.target.clone(),
            approved_by: approval.approved_by,
            approved_at: approval.approved_at,
            rationale: approval.rationale.clone(),
            execution_status: ExecutionStatus::Pending,
            execution_result: None,
            finished_at: None,
            containment_tier: approval.option.containment_tier,
            risk_level: approval.option.risk_level,
        }
    }

    /// Apply a forward status change. Returns `false` and leaves the record
    /// untouched if the step would move backwards.
    fn advance(&mut self, next: ExecutionStatus, result: Option<String>) -> bool {
        if !self.execution_status.can_transition_to(next) {
            return false;
        }
        self.execution_status = next;
        if result.is_some() {
            self.execution_result = result;
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Applies one remedy to a target. May suspend on I/O.
#[async_trait]
pub trait TreatmentHandler: Send + Sync {
    /// Apply the remedy to `target` and describe what happened.
    async fn apply(&self, target: &str) -> Result<String, HandlerError>;
}

/// Boxed future returned by closure-backed handlers.
pub type BoxedApply = Pin<Box<dyn Future<Output = Result<String, HandlerError>> + Send>>;

/// Closure-backed [`TreatmentHandler`]; build with [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> TreatmentHandler for FnHandler<F>
where
    F: Fn(String) -> BoxedApply + Send + Sync,
{
    async fn apply(&self, target: &str) -> Result<String, HandlerError> {
        (self.f)(target.to_string()).await
    }
}

/// Wrap an async closure as a handler.
///
/// ```
/// use governance_orchestrator::treatment::handler_fn;
///
/// let handler = handler_fn(|target| async move { Ok(format!("restarted {target}")) });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TreatmentHandler>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f: move |target: String| -> BoxedApply { Box::pin(f(target)) },
    })
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Structural failures at the execution boundary.
///
/// Handler failures are not errors: they are captured in the record and
/// reported through the `bool` returned by [`TreatmentOrchestrator::execute`].
#[derive(Debug, Error)]
pub enum TreatmentError {
    /// No handler is bound to the treatment id. The record is marked failed.
    #[error("no handler registered for treatment '{treatment_id}'")]
    NoHandler {
        /// Treatment id that had no handler.
        treatment_id: String,
    },

    /// The approval was not issued by this orchestrator.
    #[error("treatment '{treatment_id}' was never approved (approval {approval_id})")]
    ApprovalRequired {
        /// Id carried by the rejected approval.
        approval_id: Uuid,
        /// Treatment it claimed to approve.
        treatment_id: String,
    },

    /// The approval has already been executed; a fresh approval is required.
    #[error("approval {approval_id} already executed (status {status:?})")]
    AlreadyExecuted {
        /// Approval id.
        approval_id: Uuid,
        /// Status at the time of the attempt.
        status: ExecutionStatus,
    },
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

/// Approves and executes treatments.
pub struct TreatmentOrchestrator {
    mode: TreatmentMode,
    catalog: Arc<TreatmentCatalog>,
    handlers: RwLock<HashMap<String, Arc<dyn TreatmentHandler>>>,
    history: Mutex<Vec<TreatmentRecord>>,
    target_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl TreatmentOrchestrator {
    /// Orchestrator over `catalog` in the given mode.
    pub fn new(mode: TreatmentMode, catalog: Arc<TreatmentCatalog>) -> Self {
        Self {
            mode,
            catalog,
            handlers: RwLock::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            target_locks: DashMap::new(),
        }
    }

    /// Operating mode.
    pub fn mode(&self) -> TreatmentMode {
        self.mode
    }

    /// Catalog in use.
    pub fn catalog(&self) -> &Arc<TreatmentCatalog> {
        &self.catalog
    }

    /// Bind `handler` to a treatment id, replacing any previous binding.
    pub fn register_handler(
        &self,
        treatment_id: impl Into<String>,
        handler: Arc<dyn TreatmentHandler>,
    ) {
        self.handlers.write().insert(treatment_id.into(), handler);
    }

    /// Whether a handler is bound to `treatment_id`.
    pub fn has_handler(&self, treatment_id: &str) -> bool {
        self.handlers.read().contains_key(treatment_id)
    }

    /// All catalog options for `condition`. Severity does not filter.
    pub fn suggest(&self, condition: &str, severity: ConditionSeverity) -> Vec<TreatmentOption> {
        let options = self.catalog.get_options(condition);
        info!(
            condition,
            %severity,
            options = options.len(),
            "treatment options suggested"
        );
        options
    }

    /// Record a human decision. A rejection creates nothing.
    pub fn human_approve(
        &self,
        option: &TreatmentOption,
        target: &str,
        decision: bool,
        rationale: impl Into<String>,
    ) -> Option<ApprovedTreatment> {
        let rationale = rationale.into();
        if !decision {
            info!(treatment = %option.id, target, %rationale, "treatment rejected by human");
            return None;
        }
        Some(self.approve(option, target, Approver::Human, rationale))
    }

    /// Auto-approve under the autonomous rule.
    ///
    /// Approves only in `Autonomous` mode, for an option that requires human
    /// approval, at `Critical` severity. Every other combination returns `None`.
    pub fn autonomous_approve(
        &self,
        option: &TreatmentOption,
        target: &str,
        severity: ConditionSeverity,
    ) -> Option<ApprovedTreatment> {
        if self.mode != TreatmentMode::Autonomous {
            return None;
        }
        if !option.requires_human_approval || severity != ConditionSeverity::Critical {
            return None;
        }
        let rationale = format!(
            "auto-approved: {severity} condition on {target}, \
             no operator response required for '{}'",
            option.name
        );
        Some(self.approve(option, target, Approver::Orchestrator, rationale))
    }

    fn approve(
        &self,
        option: &TreatmentOption,
        target: &str,
        approved_by: Approver,
        rationale: String,
    ) -> ApprovedTreatment {
        let approval = ApprovedTreatment {
            id: Uuid::new_v4(),
            option: option.clone(),
            target: target.to_string(),
            approved_by,
            approved_at: Utc::now(),
            rationale,
        };
        self.history
            .lock()
            .push(TreatmentRecord::from_approval(&approval));
        info!(
            approval_id = %approval.id,
            treatment = %option.id,
            target,
            approved_by = ?approved_by,
            tier = ?option.containment_tier,
            "treatment approved"
        );
        approval
    }

    /// Run an approved treatment through its handler.
    ///
    /// Returns `Ok(true)` when the handler completed and `Ok(false)` when it
    /// failed or panicked; either way the outcome is captured in the record.
    ///
    /// # Errors
    /// - [`TreatmentError::ApprovalRequired`] if the approval is unknown here.
    /// - [`TreatmentError::AlreadyExecuted`] if it is no longer pending.
    /// - [`TreatmentError::NoHandler`] if no handler is bound; the record is
    ///   marked failed.
    pub async fn execute(&self, approval: &ApprovedTreatment) -> Result<bool, TreatmentError> {
        let target_lock = self
            .target_locks
            .entry(approval.target.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _serial = target_lock.lock().await;

        let treatment_id = approval.option.id.clone();
        let handler = self.handlers.read().get(&treatment_id).cloned();

        {
            let mut history = self.history.lock();
            let record = history
                .iter_mut()
                .find(|r| r.approval_id == approval.id && r.treatment_id == treatment_id)
                .ok_or_else(|| TreatmentError::ApprovalRequired {
                    approval_id: approval.id,
                    treatment_id: treatment_id.clone(),
                })?;
            if record.execution_status != ExecutionStatus::Pending {
                return Err(TreatmentError::AlreadyExecuted {
                    approval_id: approval.id,
                    status: record.execution_status,
                });
            }
            if handler.is_none() {
                record.advance(
                    ExecutionStatus::Failed,
                    Some(format!("no handler registered for '{treatment_id}'")),
                );
                error!(
                    treatment = %treatment_id,
                    target = %approval.target,
                    "no handler registered"
                );
                metrics::inc_treatment(&treatment_id, ExecutionStatus::Failed.as_str());
                return Err(TreatmentError::NoHandler { treatment_id });
            }
            record.advance(ExecutionStatus::Executing, None);
        }

        let Some(handler) = handler else {
            return Err(TreatmentError::NoHandler { treatment_id });
        };

        info!(treatment = %treatment_id, target = %approval.target, "executing treatment");
        let outcome = AssertUnwindSafe(handler.apply(&approval.target))
            .catch_unwind()
            .await;

        let (status, text) = match outcome {
            Ok(Ok(text)) => (ExecutionStatus::Completed, text),
            Ok(Err(e)) => (ExecutionStatus::Failed, e.to_string()),
            Err(panic) => (
                ExecutionStatus::Failed,
                format!("handler panicked: {}", panic_message(panic.as_ref())),
            ),
        };
        let success = status == ExecutionStatus::Completed;

        if let Some(record) = self
            .history
            .lock()
            .iter_mut()
            .find(|r| r.approval_id == approval.id)
        {
            record.advance(status, Some(text.clone()));
        }
        self.catalog.record_outcome(&treatment_id, success);
        metrics::inc_treatment(&treatment_id, status.as_str());

        if success {
            info!(
                treatment = %treatment_id,
                target = %approval.target,
                result = %text,
                "treatment completed"
            );
        } else {
            warn!(
                treatment = %treatment_id,
                target = %approval.target,
                error = %text,
                "treatment failed"
            );
        }
        Ok(success)
    }

    /// Every approval with its current status, in approval order.
    pub fn history(&self) -> Vec<TreatmentRecord> {
        self.history.lock().clone()
    }

    /// Current record for one approval.
    pub fn record(&self, approval_id: Uuid) -> Option<TreatmentRecord> {
        self.history
            .lock()
            .iter()
            .find(|r| r.approval_id == approval_id)
            .cloned()
    }
}

impl fmt::Debug for TreatmentOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreatmentOrchestrator")
            .field("mode", &self.mode)
            .field("handlers", &self.handlers.read().len())
            .field("history", &self.history.lock().len())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn orchestrator(mode: TreatmentMode) -> TreatmentOrchestrator {
        TreatmentOrchestrator::new(mode, Arc::new(TreatmentCatalog::builtin()))
    }

    fn mandatory() -> TreatmentOption {
        TreatmentCatalog::builtin().find("graceful_restart").unwrap()
    }

    fn optional() -> TreatmentOption {
        TreatmentCatalog::builtin().find("repair_imports").unwrap()
    }

    fn ok_handler() -> Arc<dyn TreatmentHandler> {
        handler_fn(|target| async move { Ok(format!("done on {target}")) })
    }

    #[test]
    fn test_severity_parses_lowercase_names() {
        assert_eq!("critical".parse::<ConditionSeverity>().unwrap(), ConditionSeverity::Critical);
        assert_eq!(" Mild ".parse::<ConditionSeverity>().unwrap(), ConditionSeverity::Mild);
        assert!("catastrophic".parse::<ConditionSeverity>().is_err());
        assert_eq!(ConditionSeverity::Severe.to_string(), "severe");
    }

    #[test]
    fn test_status_moves_forward_only() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Completed));
        assert!(Executing.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(Pending));
    }

    #[test]
    fn test_suggest_ignores_severity() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        let mild = orch.suggest("overload", ConditionSeverity::Mild);
        let critical = orch.suggest("overload", ConditionSeverity::Critical);
        assert_eq!(mild, critical);
        assert_eq!(mild.len(), 2);
        assert!(orch.suggest("unknown", ConditionSeverity::Critical).is_empty());
    }

    #[test]
    fn test_human_rejection_creates_nothing() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        assert!(orch.human_approve(&optional(), "a", false, "not now").is_none());
        assert!(orch.history().is_empty());
    }

    #[test]
    fn test_human_approval_recorded_pending() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        let approval = orch.human_approve(&optional(), "a", true, "looks safe").unwrap();
        assert_eq!(approval.approved_by(), Approver::Human);
        assert_eq!(approval.rationale(), "looks safe");
        let record = orch.record(approval.id()).unwrap();
        assert_eq!(record.execution_status, ExecutionStatus::Pending);
        assert_eq!(record.target, "a");
    }

    #[test]
    fn test_autonomous_approve_fails_closed_in_human_mode() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        for severity in [
            ConditionSeverity::Mild,
            ConditionSeverity::Moderate,
            ConditionSeverity::Severe,
            ConditionSeverity::Critical,
        ] {
            assert!(orch.autonomous_approve(&mandatory(), "a", severity).is_none());
        }
        assert!(orch.history().is_empty());
    }

    #[test]
    fn test_autonomous_approve_requires_mandatory_and_critical() {
        let orch = orchestrator(TreatmentMode::Autonomous);
        assert!(orch
            .autonomous_approve(&mandatory(), "a", ConditionSeverity::Severe)
            .is_none());
        assert!(orch
            .autonomous_approve(&optional(), "a", ConditionSeverity::Critical)
            .is_none());
        let approval = orch
            .autonomous_approve(&mandatory(), "a", ConditionSeverity::Critical)
            .unwrap();
        assert_eq!(approval.approved_by(), Approver::Orchestrator);
        assert!(approval.rationale().contains("critical"));
        assert_eq!(orch.history().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_completes_and_captures_result() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        orch.register_handler("repair_imports", ok_handler());
        let approval = orch.human_approve(&optional(), "alpha", true, "go").unwrap();
        assert!(orch.execute(&approval).await.unwrap());
        let record = orch.record(approval.id()).unwrap();
        assert_eq!(record.execution_status, ExecutionStatus::Completed);
        assert_eq!(record.execution_result.as_deref(), Some("done on alpha"));
        assert!(record.finished_at.is_some());
        assert_eq!(orch.catalog().effectiveness("repair_imports").unwrap().successes, 1);
    }

    #[tokio::test]
    async fn test_execute_without_handler_marks_failed() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        let approval = orch.human_approve(&optional(), "alpha", true, "go").unwrap();
        let err = orch.execute(&approval).await.unwrap_err();
        assert!(matches!(err, TreatmentError::NoHandler { .. }));
        let record = orch.record(approval.id()).unwrap();
        assert_eq!(record.execution_status, ExecutionStatus::Failed);
        assert!(orch.catalog().effectiveness("repair_imports").is_none());
    }

    #[tokio::test]
    async fn test_handler_error_is_absorbed() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        orch.register_handler(
            "repair_imports",
            handler_fn(|_| async move { Err::<String, HandlerError>("disk full".into()) }),
        );
        let approval = orch.human_approve(&optional(), "alpha", true, "go").unwrap();
        assert!(!orch.execute(&approval).await.unwrap());
        let record = orch.record(approval.id()).unwrap();
        assert_eq!(record.execution_status, ExecutionStatus::Failed);
        assert_eq!(record.execution_result.as_deref(), Some("disk full"));
        assert_eq!(orch.catalog().effectiveness("repair_imports").unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_handler_panic_is_absorbed() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        orch.register_handler(
            "repair_imports",
            handler_fn(|target| async move {
                if !target.is_empty() {
                    std::panic::panic_any("boom");
                }
                Ok(String::new())
            }),
        );
        let approval = orch.human_approve(&optional(), "alpha", true, "go").unwrap();
        assert!(!orch.execute(&approval).await.unwrap());
        let record = orch.record(approval.id()).unwrap();
        assert_eq!(record.execution_status, ExecutionStatus::Failed);
        assert!(record.execution_result.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_second_execute_does_not_rerun_handler() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        orch.register_handler(
            "repair_imports",
            handler_fn(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("ok".to_string())
                }
            }),
        );
        let approval = orch.human_approve(&optional(), "alpha", true, "go").unwrap();
        assert!(orch.execute(&approval).await.unwrap());
        let err = orch.execute(&approval).await.unwrap_err();
        assert!(matches!(
            err,
            TreatmentError::AlreadyExecuted {
                status: ExecutionStatus::Completed,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let again = orch.human_approve(&optional(), "alpha", true, "rerun").unwrap();
        assert!(orch.execute(&again).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_foreign_approval_rejected() {
        let issuer = orchestrator(TreatmentMode::HumanInLoop);
        let other = orchestrator(TreatmentMode::HumanInLoop);
        other.register_handler("repair_imports", ok_handler());
        let approval = issuer.human_approve(&optional(), "alpha", true, "go").unwrap();
        let err = other.execute(&approval).await.unwrap_err();
        assert!(matches!(err, TreatmentError::ApprovalRequired { .. }));
        assert!(other.history().is_empty());
    }

    #[tokio::test]
    async fn test_same_target_executions_are_serialized() {
        let orch = Arc::new(orchestrator(TreatmentMode::HumanInLoop));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (a, m) = (Arc::clone(&active), Arc::clone(&max_seen));
        orch.register_handler(
            "repair_imports",
            handler_fn(move |_| {
                let (a, m) = (Arc::clone(&a), Arc::clone(&m));
                async move {
                    let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                    m.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    a.fetch_sub(1, Ordering::SeqCst);
                    Ok("ok".to_string())
                }
            }),
        );
        let first = orch.human_approve(&optional(), "alpha", true, "1").unwrap();
        let second = orch.human_approve(&optional(), "alpha", true, "2").unwrap();
        let (o1, o2) = (Arc::clone(&orch), Arc::clone(&orch));
        let h1 = tokio::spawn(async move { o1.execute(&first).await });
        let h2 = tokio::spawn(async move { o2.execute(&second).await });
        assert!(h1.await.unwrap().unwrap());
        assert!(h2.await.unwrap().unwrap());
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_history_keeps_approval_order() {
        let orch = orchestrator(TreatmentMode::HumanInLoop);
        let first = orch.human_approve(&optional(), "a", true, "1").unwrap();
        let second = orch.human_approve(&mandatory(), "b", true, "2").unwrap();
        let ids: Vec<_> = orch.history().into_iter().map(|r| r.approval_id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
        assert_eq!(orch.history()[1].containment_tier, ContainmentTier::None);
    }
}
