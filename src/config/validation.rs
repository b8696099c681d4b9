//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`GovernanceConfig`] that the
//! type system cannot express (ranges, cross-field ordering).
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value

use super::GovernanceConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "consensus.threshold").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn check_unit(errors: &mut Vec<ConfigError>, field: &str, v: f64) {
    if !(0.0..=1.0).contains(&v) {
        errors.push(invalid(field, v, "must be within [0.0, 1.0]"));
    }
}

/// Validate all semantic constraints on a [`GovernanceConfig`].
///
/// # Errors
///
/// Returns every violation found.
pub fn validate(config: &GovernanceConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let c = &config.consensus;
    check_unit(&mut errors, "consensus.threshold", c.threshold);
    check_unit(
        &mut errors,
        "consensus.severe_disagreement_below",
        c.severe_disagreement_below,
    );
    check_unit(&mut errors, "consensus.nominal_confidence", c.nominal_confidence);
    if c.severe_disagreement_below > c.threshold {
        errors.push(invalid(
            "consensus.severe_disagreement_below",
            c.severe_disagreement_below,
            "must not exceed consensus.threshold",
        ));
    }

    if config.health.degrade_after_consecutive_errors == 0 {
        errors.push(invalid(
            "health.degrade_after_consecutive_errors",
            0,
            "must be at least 1",
        ));
    }

    let s = &config.self_exam;
    if s.trend_window < 2 {
        errors.push(invalid(
            "self_exam.trend_window",
            s.trend_window,
            "must be at least 2",
        ));
    }
    if s.improving_above < 0.0 {
        errors.push(invalid(
            "self_exam.improving_above",
            s.improving_above,
            "must be >= 0",
        ));
    }
    if s.declining_below > 0.0 {
        errors.push(invalid(
            "self_exam.declining_below",
            s.declining_below,
            "must be <= 0",
        ));
    }

    let fmt = config.observability.log_format.as_str();
    if fmt != "pretty" && fmt != "json" {
        errors.push(invalid(
            "observability.log_format",
            fmt,
            "must be \"pretty\" or \"json\"",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
