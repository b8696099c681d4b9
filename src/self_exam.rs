//! # Self-Examination Engine
//!
//! ## Responsibility
//! Accumulate timestamped performance samples, derive a short-window trend
//! per metric, turn trends into a diagnosis, and map the diagnosis to canned
//! improvement actions.
//!
//! ## Guarantees
//! - Samples are retained indefinitely; analysis only reads the most recent
//!   `trend_window` samples of each metric
//! - Division by a zero oldest value is treated as no change
//! - Analysis is a pure function of the accumulated history
//!
//! ## NOT Responsible For
//! - Choosing treatments (that belongs to `treatment`)
//! - Collecting the metrics (callers push them in)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SelfExamConfig;

/// Canned remediation per issue keyword. First match wins.
const IMPROVEMENT_ACTIONS: &[(&str, &str)] = &[
    ("response_time", "Optimize latency: review the processing path"),
    ("accuracy", "Improve accuracy: raise input data quality"),
    ("error_rate", "Reduce errors: harden output validation"),
];

/// One recorded metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// When the sample was recorded.
    pub timestamp: DateTime<Utc>,
    /// Metric name.
    pub metric: String,
    /// Metric value.
    pub value: f64,
}

/// Direction of a metric over the analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Relative change above the improving threshold.
    Improving,
    /// Relative change below the declining threshold.
    Declining,
    /// Relative change within the thresholds.
    Stable,
    /// Fewer than two samples.
    InsufficientData,
}

/// Issues and strengths derived from trends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// One entry per declining metric, e.g. `"accuracy declining"`.
    pub issues: Vec<String>,
    /// One entry per improving metric, e.g. `"accuracy improving"`.
    pub strengths: Vec<String>,
}

/// Suggested follow-ups for a diagnosis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImprovementPlan {
    /// Canned actions for issues with a known remedy.
    pub actions: Vec<String>,
    /// Issues with no canned remedy. Empty when surfacing is disabled.
    pub unclassified: Vec<String>,
}

/// Full result of one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfAnalysis {
    /// When the analysis ran.
    pub timestamp: DateTime<Utc>,
    /// Trend per metric.
    pub trends: BTreeMap<String, Trend>,
    /// Derived diagnosis.
    pub diagnosis: Diagnosis,
    /// Improvement plan for the diagnosis.
    pub plan: ImprovementPlan,
}

/// Trend over `values`, oldest first.
pub fn trend_of(values: &[f64], cfg: &SelfExamConfig) -> Trend {
    let (Some(&oldest), Some(&newest)) = (values.first(), values.last()) else {
        return Trend::InsufficientData;
    };
    if values.len() < 2 {
        return Trend::InsufficientData;
    }
    let change = if oldest == 0.0 {
        0.0
    } else {
        (newest - oldest) / oldest
    };
    if change > cfg.improving_above {
        Trend::Improving
    } else if change < cfg.declining_below {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

/// Diagnosis for a set of trends.
pub fn diagnose(trends: &BTreeMap<String, Trend>) -> Diagnosis {
    let mut diagnosis = Diagnosis::default();
    for (metric, trend) in trends {
        match trend {
            Trend::Declining => diagnosis.issues.push(format!("{metric} declining")),
            Trend::Improving => diagnosis.strengths.push(format!("{metric} improving")),
            Trend::Stable | Trend::InsufficientData => {}
        }
    }
    diagnosis
}

/// Improvement plan for a diagnosis.
pub fn plan_for(diagnosis: &Diagnosis, surface_unclassified: bool) -> ImprovementPlan {
    let mut plan = ImprovementPlan::default();
    for issue in &diagnosis.issues {
        match IMPROVEMENT_ACTIONS
            .iter()
            .find(|(keyword, _)| issue.contains(keyword))
        {
            Some((_, action)) => plan.actions.push((*action).to_string()),
            None if surface_unclassified => plan.unclassified.push(issue.clone()),
            None => {}
        }
    }
    plan
}

/// Accumulates samples and analyses them.
pub struct SelfExamination {
    cfg: SelfExamConfig,
    history: Mutex<BTreeMap<String, Vec<PerformanceSample>>>,
}

impl SelfExamination {
    /// Engine with the given settings.
    pub fn new(cfg: SelfExamConfig) -> Self {
        Self {
            cfg,
            history: Mutex::new(BTreeMap::new()),
        }
    }

    /// Append one sample per metric, stamped now, and analyse the result.
    pub fn record_metrics<I, K>(&self, metrics: I) -> SelfAnalysis
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let timestamp = Utc::now();
        {
            let mut history = self.history.lock();
            for (metric, value) in metrics {
                let metric = metric.as_ref();
                history
                    .entry(metric.to_string())
                    .or_default()
                    .push(PerformanceSample {
                        timestamp,
                        metric: metric.to_string(),
                        value,
                    });
            }
        }

        let trends = self.trends();
        let diagnosis = diagnose(&trends);
        let plan = plan_for(&diagnosis, self.cfg.surface_unclassified_issues);
        debug!(
            issues = diagnosis.issues.len(),
            strengths = diagnosis.strengths.len(),
            "self-examination complete"
        );
        SelfAnalysis {
            timestamp,
            trends,
            diagnosis,
            plan,
        }
    }

    /// Current trend per metric over the configured window.
    pub fn trends(&self) -> BTreeMap<String, Trend> {
        let history = self.history.lock();
        history
            .iter()
            .map(|(metric, samples)| {
                let skip = samples.len().saturating_sub(self.cfg.trend_window);
                let window: Vec<f64> = samples.iter().skip(skip).map(|s| s.value).collect();
                (metric.clone(), trend_of(&window, &self.cfg))
            })
            .collect()
    }

    /// Every sample recorded for `metric`, oldest first.
    pub fn samples(&self, metric: &str) -> Vec<PerformanceSample> {
        self.history.lock().get(metric).cloned().unwrap_or_default()
    }

    /// Total samples across all metrics.
    pub fn sample_count(&self) -> usize {
        self.history.lock().values().map(Vec::len).sum()
    }
}

impl Default for SelfExamination {
    fn default() -> Self {
        Self::new(SelfExamConfig::default())
    }
}
