//! Demo binary for governance-orchestrator
//!
//! Registers three producers, runs a handful of requests through them,
//! drives one producer into degradation, remediates it, and prints the
//! health report and treatment history as JSON.
//!
//! ## Usage
//!
//! ```text
//! governance-demo [path/to/governance.toml]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output (overrides the config file)
//! - `RUST_LOG=info`: log level filter

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use governance_orchestrator::config::loader;
use governance_orchestrator::{
    handler_fn, init_tracing_with_format, metrics, ConditionSeverity, FnProducer,
    GovernanceConfig, GovernanceOrchestrator, Producer, TreatmentMode, Validator, Verdict,
};
use tracing::{info, warn};

fn keyword_validator(keyword: &'static str) -> Arc<dyn Validator> {
    Arc::new(move |output: &str| {
        if output.contains(keyword) {
            Verdict::valid(format!("mentions '{keyword}'"))
        } else {
            Verdict::invalid(format!("does not mention '{keyword}'"))
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Without a config file the demo runs in autonomous mode.
    let config = match std::env::args().nth(1) {
        Some(path) => loader::load_from_file(Path::new(&path))?,
        None => {
            let mut config = GovernanceConfig::default();
            config.treatment.mode = TreatmentMode::Autonomous;
            config
        }
    };

    let format =
        std::env::var("LOG_FORMAT").unwrap_or_else(|_| config.observability.log_format.clone());
    let _ = init_tracing_with_format(&format);
    metrics::init_metrics()?;

    info!("Starting governance-orchestrator demo");

    let gov = GovernanceOrchestrator::new(config);
    gov.register_producer("summarizer", "llm", keyword_validator("answer"))?;
    gov.register_producer("fact_checker", "llm", keyword_validator("answer"))?;
    gov.register_producer("stylist", "llm", keyword_validator("answer"))?;

    gov.treatments().register_handler(
        "quarantine_producer",
        handler_fn(|target| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(format!("{target} removed from live traffic"))
        }),
    );
    gov.treatments().register_handler(
        "tighten_output_checks",
        handler_fn(|target| async move { Ok(format!("strict validation enabled for {target}")) }),
    );

    let healthy: Vec<Arc<dyn Producer>> = vec![
        Arc::new(FnProducer::new("summarizer", |input: &str| {
            format!("answer: summary of '{input}'")
        })),
        Arc::new(FnProducer::new("fact_checker", |input: &str| {
            format!("answer: '{input}' checks out")
        })),
        Arc::new(FnProducer::new("stylist", |input: &str| {
            format!("answer, polished: {input}")
        })),
    ];

    for input in ["What is Rust?", "Explain ownership", "Why async?"] {
        let outcome = gov.process(input, &healthy).await;
        info!(
            request_id = %outcome.request_id,
            accepted = outcome.metrics.producers_accepted,
            success_rate = outcome.metrics.success_rate,
            "demo request complete"
        );
    }

    // The stylist starts producing off-topic output.
    let drifting: Vec<Arc<dyn Producer>> = vec![
        Arc::clone(&healthy[0]),
        Arc::clone(&healthy[1]),
        Arc::new(FnProducer::new("stylist", |_: &str| "lorem ipsum".to_string())),
    ];

    let mut last = None;
    for input in ["Summarize the report", "List the risks", "Draft a reply"] {
        last = Some(gov.process(input, &drifting).await);
    }

    if let Some(outcome) = last {
        let proposals = gov.plan_remediation(outcome.diagnosis(), ConditionSeverity::Critical);
        for proposal in &proposals {
            info!(
                issue = %proposal.issue,
                condition = %proposal.condition,
                options = proposal.options.len(),
                "remediation proposed"
            );
        }
    }

    let records = gov
        .auto_remediate("stylist", "output_rejection", ConditionSeverity::Critical)
        .await?;
    if records.is_empty() {
        warn!("no treatment was auto-approved; human approval required");
    }

    // A human operator approves the low-risk option as well.
    if let Some(option) = gov.treatments().catalog().find("tighten_output_checks") {
        if let Some(approval) = gov.treatments().human_approve(
            &option,
            "stylist",
            true,
            "operator confirmed drift",
        ) {
            gov.treatments().execute(&approval).await?;
        }
    }

    gov.reevaluate_health("stylist", true)?;

    println!("{}", serde_json::to_string_pretty(&gov.health_report())?);
    println!("{}", serde_json::to_string_pretty(&gov.treatments().history())?);

    info!(audit_entries = gov.audit_log().len(), "Demo complete");
    Ok(())
}
