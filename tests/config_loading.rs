//! Configuration loading integration tests
//!
//! Loads TOML from disk, checks that the settings reach the components they
//! configure, and that invalid documents report every violation.

use std::io::Write;
use std::sync::Arc;

use governance_orchestrator::config::{export_schema, loader, validation::ConfigError};
use governance_orchestrator::{
    GovernanceConfig, GovernanceOrchestrator, HealthStatus, TreatmentMode, Validator, Verdict,
};

fn write_toml(content: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f
}

fn reject_all() -> Arc<dyn Validator> {
    Arc::new(|_: &str| Verdict::invalid("no"))
}

#[test]
fn test_empty_file_yields_defaults() {
    let f = write_toml("");
    let cfg = loader::load_from_file(f.path()).unwrap();
    assert_eq!(cfg, GovernanceConfig::default());
    assert_eq!(cfg.consensus.threshold, 0.7);
    assert_eq!(cfg.self_exam.trend_window, 10);
    assert_eq!(cfg.treatment.mode, TreatmentMode::HumanInLoop);
    assert_eq!(cfg.audit.retention(), None);
}

#[test]
fn test_partial_sections_keep_other_defaults() {
    let f = write_toml("[self_exam]\ntrend_window = 4\n");
    let cfg = loader::load_from_file(f.path()).unwrap();
    assert_eq!(cfg.self_exam.trend_window, 4);
    assert_eq!(cfg.self_exam.improving_above, 0.1);
    assert!(cfg.self_exam.surface_unclassified_issues);
}

#[test]
fn test_degrade_threshold_reaches_health_tracker() {
    let f = write_toml("[health]\ndegrade_after_consecutive_errors = 1\n");
    let gov = GovernanceOrchestrator::new(loader::load_from_file(f.path()).unwrap());
    gov.register_producer("p", "llm", reject_all()).unwrap();
    gov.verify("p", "x").unwrap();
    let snapshot = gov.producer("p").unwrap();
    assert_eq!(snapshot.health, HealthStatus::Degraded);
    assert_eq!(snapshot.recovery_count, 1);
}

#[test]
fn test_audit_retention_caps_log() {
    let f = write_toml(
        "[audit]\nmax_entries = 2\n[health]\ndegrade_after_consecutive_errors = 1\n",
    );
    let gov = GovernanceOrchestrator::new(loader::load_from_file(f.path()).unwrap());
    gov.register_producer("p", "llm", reject_all()).unwrap();
    for _ in 0..3 {
        gov.verify("p", "x").unwrap();
    }
    assert_eq!(gov.audit_log().len(), 2);
    assert_eq!(gov.health_report().audit_log_size, 2);
    assert!(gov.audit_log().total_recorded() >= 6);
}

#[test]
fn test_threshold_setting_changes_anomaly_boundary() {
    let f = write_toml("[consensus]\nthreshold = 0.4\nsevere_disagreement_below = 0.1\n");
    let gov = GovernanceOrchestrator::new(loader::load_from_file(f.path()).unwrap());
    let accept: Arc<dyn Validator> = Arc::new(|_: &str| Verdict::valid("yes"));
    gov.register_producer("src", "llm", Arc::clone(&accept)).unwrap();
    gov.register_producer("yes", "llm", accept).unwrap();
    gov.register_producer("no", "llm", reject_all()).unwrap();
    // 1 of 2 peers agree: anomalous at 0.7, fine at 0.4.
    assert!(gov.verify("src", "x").unwrap().valid);
}

#[test]
fn test_invalid_document_reports_every_violation() {
    let f = write_toml(
        r#"
[consensus]
threshold = 1.2

[health]
degrade_after_consecutive_errors = 0

[observability]
log_format = "xml"
"#,
    );
    match loader::load_from_file(f.path()) {
        Err(ConfigError::Validation(msg)) => {
            assert!(msg.contains("consensus.threshold"));
            assert!(msg.contains("health.degrade_after_consecutive_errors"));
            assert!(msg.contains("observability.log_format"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_unknown_mode_is_parse_error() {
    let f = write_toml("[treatment]\nmode = \"reckless\"\n");
    assert!(matches!(
        loader::load_from_file(f.path()),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_schema_lists_sections() {
    let schema = export_schema().unwrap();
    for section in ["consensus", "health", "audit", "self_exam", "treatment", "observability"] {
        assert!(schema.contains(section), "schema missing {section}");
    }
}
