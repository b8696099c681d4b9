//! Treatment workflow integration tests
//!
//! Drives the catalog → approval → execution → effectiveness loop through
//! the public API, including the remediation path from a self-examination
//! diagnosis.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use governance_orchestrator::treatment::{HandlerError, TreatmentEffectiveness};
use governance_orchestrator::{
    handler_fn, Approver, ConditionSeverity, ContainmentTier, ExecutionStatus, FnProducer,
    GovernanceConfig, GovernanceOrchestrator, Producer, TreatmentCatalog, TreatmentError,
    TreatmentMode, TreatmentOption, TreatmentOrchestrator, Validator, Verdict,
};

fn orchestrator(mode: TreatmentMode) -> TreatmentOrchestrator {
    TreatmentOrchestrator::new(mode, Arc::new(TreatmentCatalog::builtin()))
}

fn option(id: &str) -> TreatmentOption {
    TreatmentCatalog::builtin().find(id).unwrap()
}

// ── catalog ───────────────────────────────────────────────────────────

#[test]
fn test_builtin_catalog_covers_remediation_conditions() {
    let catalog = TreatmentCatalog::builtin();
    for condition in ["latency_degradation", "output_rejection", "validation_faults"] {
        assert!(
            !catalog.get_options(condition).is_empty(),
            "{condition} must have options"
        );
    }
}

#[test]
fn test_disconnect_option_has_highest_containment() {
    let options = TreatmentCatalog::builtin().get_options("overload");
    let max = options.iter().map(|o| o.containment_tier).max().unwrap();
    assert_eq!(max, ContainmentTier::FullDisconnection);
}

#[test]
fn test_option_serializes_snake_case() {
    let json = serde_json::to_value(option("limit_context")).unwrap();
    assert_eq!(json["containment_tier"], "context_isolation");
    assert_eq!(json["risk_level"], "medium");
    assert_eq!(json["requires_human_approval"], true);
}

// ── approval rules ────────────────────────────────────────────────────

#[test]
fn test_autonomous_rule_matrix() {
    let autonomous = orchestrator(TreatmentMode::Autonomous);
    let human = orchestrator(TreatmentMode::HumanInLoop);
    let mandatory = option("temporary_disconnect");
    let optional = option("apply_rate_limit");

    let severities = [
        ConditionSeverity::Mild,
        ConditionSeverity::Moderate,
        ConditionSeverity::Severe,
        ConditionSeverity::Critical,
    ];
    for severity in severities {
        assert!(human
            .autonomous_approve(&mandatory, "p", severity)
            .is_none());
        assert!(autonomous
            .autonomous_approve(&optional, "p", severity)
            .is_none());
        let approved = autonomous.autonomous_approve(&mandatory, "p", severity);
        assert_eq!(approved.is_some(), severity == ConditionSeverity::Critical);
    }
    assert_eq!(autonomous.history().len(), 1);
    assert_eq!(autonomous.history()[0].approved_by, Approver::Orchestrator);
}

#[test]
fn test_severity_from_config_string() {
    let severity: ConditionSeverity = "critical".parse().unwrap();
    let orch = orchestrator(TreatmentMode::Autonomous);
    assert!(orch
        .autonomous_approve(&option("full_reset"), "p", severity)
        .is_some());
}

// ── execution ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_lifecycle_is_recorded() {
    let orch = orchestrator(TreatmentMode::HumanInLoop);
    orch.register_handler(
        "apply_rate_limit",
        handler_fn(|target| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(format!("rate limit applied to {target}"))
        }),
    );

    let suggested = orch.suggest("overload", ConditionSeverity::Moderate);
    let approval = orch
        .human_approve(&suggested[0], "producer-1", true, "load spike")
        .unwrap();
    assert_eq!(
        orch.record(approval.id()).unwrap().execution_status,
        ExecutionStatus::Pending
    );

    assert!(orch.execute(&approval).await.unwrap());

    let history = orch.history();
    assert_eq!(history.len(), 1);
    let record = &history[0];
    assert_eq!(record.execution_status, ExecutionStatus::Completed);
    assert_eq!(record.approved_by, Approver::Human);
    assert_eq!(record.containment_tier, ContainmentTier::ResponseFiltering);
    assert_eq!(
        record.execution_result.as_deref(),
        Some("rate limit applied to producer-1")
    );
}

#[tokio::test]
async fn test_missing_handler_is_hard_error_and_recorded() {
    let orch = orchestrator(TreatmentMode::HumanInLoop);
    let approval = orch
        .human_approve(&option("security_scan"), "p", true, "audit")
        .unwrap();
    match orch.execute(&approval).await {
        Err(TreatmentError::NoHandler { treatment_id }) => {
            assert_eq!(treatment_id, "security_scan")
        }
        other => panic!("expected NoHandler, got {other:?}"),
    }
    assert_eq!(
        orch.record(approval.id()).unwrap().execution_status,
        ExecutionStatus::Failed
    );
    // A failed approval cannot be retried.
    assert!(matches!(
        orch.execute(&approval).await,
        Err(TreatmentError::AlreadyExecuted { .. })
    ));
}

#[tokio::test]
async fn test_approval_from_other_orchestrator_rejected() {
    let a = orchestrator(TreatmentMode::HumanInLoop);
    let b = orchestrator(TreatmentMode::HumanInLoop);
    b.register_handler("security_scan", handler_fn(|_| async { Ok("ok".to_string()) }));
    let approval = a
        .human_approve(&option("security_scan"), "p", true, "audit")
        .unwrap();
    assert!(matches!(
        b.execute(&approval).await,
        Err(TreatmentError::ApprovalRequired { .. })
    ));
}

#[tokio::test]
async fn test_different_targets_run_in_parallel() {
    let orch = Arc::new(orchestrator(TreatmentMode::HumanInLoop));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
    orch.register_handler(
        "apply_rate_limit",
        handler_fn(move |_| {
            let (a, p) = (Arc::clone(&a), Arc::clone(&p));
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok("ok".to_string())
            }
        }),
    );

    let rate_limit = option("apply_rate_limit");
    let mut handles = Vec::new();
    for target in ["x", "y", "z"] {
        let approval = orch.human_approve(&rate_limit, target, true, "spike").unwrap();
        let orch = Arc::clone(&orch);
        handles.push(tokio::spawn(async move { orch.execute(&approval).await }));
    }
    for h in handles {
        assert!(h.await.unwrap().unwrap());
    }
    assert!(peak.load(Ordering::SeqCst) > 1, "targets must not serialize each other");
}

#[tokio::test]
async fn test_effectiveness_ranking_follows_outcomes() {
    let orch = orchestrator(TreatmentMode::HumanInLoop);
    let flaky = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&flaky);
    orch.register_handler("repair_imports", handler_fn(|_| async { Ok("fixed".to_string()) }));
    orch.register_handler(
        "run_test_suite",
        handler_fn(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n % 2 == 0 {
                    Err::<String, HandlerError>("tests failed".into())
                } else {
                    Ok("green".to_string())
                }
            }
        }),
    );

    for _ in 0..2 {
        for id in ["repair_imports", "run_test_suite"] {
            let approval = orch.human_approve(&option(id), "p", true, "retry").unwrap();
            orch.execute(&approval).await.unwrap();
        }
    }

    let ranked: Vec<TreatmentEffectiveness> = orch.catalog().most_effective(5);
    assert_eq!(ranked[0].treatment_id, "repair_imports");
    assert_eq!(ranked[0].success_rate(), 1.0);
    assert_eq!(ranked[1].treatment_id, "run_test_suite");
    assert_eq!(ranked[1].success_rate(), 0.5);
}

// ── remediation from diagnosis ────────────────────────────────────────

#[tokio::test]
async fn test_declining_success_rate_leads_to_quarantine() {
    let mut config = GovernanceConfig::default();
    config.treatment.mode = TreatmentMode::Autonomous;
    let gov = GovernanceOrchestrator::new(config);
    let validator: Arc<dyn Validator> = Arc::new(|out: &str| {
        if out.starts_with("ok") {
            Verdict::valid("ok")
        } else {
            Verdict::invalid("garbled")
        }
    });
    gov.register_producer("worker", "llm", validator).unwrap();

    let quarantined = Arc::new(AtomicUsize::new(0));
    let q = Arc::clone(&quarantined);
    gov.treatments().register_handler(
        "quarantine_producer",
        handler_fn(move |_| {
            q.fetch_add(1, Ordering::SeqCst);
            async { Ok("quarantined".to_string()) }
        }),
    );

    let good: Vec<Arc<dyn Producer>> =
        vec![Arc::new(FnProducer::new("worker", |_: &str| "ok".to_string()))];
    let bad: Vec<Arc<dyn Producer>> =
        vec![Arc::new(FnProducer::new("worker", |_: &str| "???".to_string()))];

    gov.process("first", &good).await;
    let outcome = gov.process("second", &bad).await;

    let proposals = gov.plan_remediation(outcome.diagnosis(), ConditionSeverity::Critical);
    let proposal = proposals
        .iter()
        .find(|p| p.issue == "success_rate declining")
        .unwrap();
    assert_eq!(proposal.condition, "output_rejection");

    let records = gov
        .auto_remediate("worker", &proposal.condition, proposal.severity)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].execution_status, ExecutionStatus::Completed);
    assert_eq!(quarantined.load(Ordering::SeqCst), 1);
}
