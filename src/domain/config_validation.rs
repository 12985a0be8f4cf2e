//! Configuration validation.
//!
//! Validates every config field before any data is loaded. Each check
//! reports the first offending key.

use crate::domain::backtest::ExecutionTiming;
use crate::domain::error::RebalancerError;
use crate::domain::policy::{ThresholdLadder, parse_rungs};
use crate::domain::rebalance::LoanBound;
use crate::domain::universe::parse_securities;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub const POLICIES: [&str; 3] = ["threshold_ladder", "buy_and_hold", "fixed_weight"];

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), RebalancerError> {
    validate_portfolio_config(config)?;
    validate_data_config(config)?;
    validate_strategy_config(config)?;
    validate_metrics_config(config)?;
    Ok(())
}

pub fn validate_portfolio_config(config: &dyn ConfigPort) -> Result<(), RebalancerError> {
    validate_securities(config)?;
    validate_dates(config)?;

    if let Some(capital) = optional_f64(config, "portfolio", "initial_capital")? {
        if capital <= 0.0 {
            return Err(invalid(
                "portfolio",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }
    }
    if let Some(max_loan) = optional_f64(config, "portfolio", "max_loan")? {
        if max_loan < 0.0 {
            return Err(invalid(
                "portfolio",
                "max_loan",
                "max_loan must be non-negative",
            ));
        }
    }
    if let Some(days) = optional_i64(config, "portfolio", "min_rebalance_interval")? {
        if days < 1 {
            return Err(invalid(
                "portfolio",
                "min_rebalance_interval",
                "min_rebalance_interval must be at least 1 day",
            ));
        }
    }
    if let Some(bound) = optional_string(config, "portfolio", "loan_bound") {
        if LoanBound::parse(&bound).is_none() {
            return Err(invalid(
                "portfolio",
                "loan_bound",
                "loan_bound must be inclusive or strict",
            ));
        }
    }
    Ok(())
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), RebalancerError> {
    required_string(config, "data", "quotes")?;
    if policy_name(config) == "threshold_ladder" {
        required_string(config, "data", "signal")?;
    }
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), RebalancerError> {
    let policy = policy_name(config);
    if !POLICIES.contains(&policy.as_str()) {
        return Err(invalid(
            "strategy",
            "policy",
            &format!("unknown policy '{policy}', expected one of {}", POLICIES.join(", ")),
        ));
    }

    if let Some(security) = optional_string(config, "strategy", "security") {
        let securities = config_securities(config)?;
        if !securities.contains(&security) {
            return Err(invalid(
                "strategy",
                "security",
                &format!("{security} is not listed in [portfolio] securities"),
            ));
        }
    }

    let base = optional_f64(config, "strategy", "base_allocation")?;
    if let Some(thresholds) = optional_string(config, "strategy", "thresholds") {
        let rungs = parse_rungs(&thresholds)
            .map_err(|e| invalid("strategy", "thresholds", &e.to_string()))?;
        ThresholdLadder::new(base.unwrap_or(1.0), rungs)
            .map_err(|e| invalid("strategy", "thresholds", &e.to_string()))?;
    }

    optional_f64(config, "strategy", "allocation")?;

    if let Some(tolerance) = optional_f64(config, "strategy", "tolerance")? {
        if tolerance < 0.0 {
            return Err(invalid(
                "strategy",
                "tolerance",
                "tolerance must be non-negative",
            ));
        }
    }

    if let Some(execution) = optional_string(config, "strategy", "execution") {
        match ExecutionTiming::parse(&execution) {
            None => {
                return Err(invalid(
                    "strategy",
                    "execution",
                    "execution must be next_open or next_close",
                ));
            }
            Some(ExecutionTiming::NextOpen) if optional_string(config, "data", "opens").is_none() => {
                return Err(RebalancerError::ConfigMissing {
                    section: "data".to_string(),
                    key: "opens".to_string(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub fn validate_metrics_config(config: &dyn ConfigPort) -> Result<(), RebalancerError> {
    if let Some(factor) = optional_f64(config, "metrics", "annualization_factor")? {
        if factor <= 0.0 {
            return Err(invalid(
                "metrics",
                "annualization_factor",
                "annualization_factor must be positive",
            ));
        }
    }
    if let Some(flag) = optional_string(config, "metrics", "risk_free_annualized") {
        if parse_bool(&flag).is_none() {
            return Err(invalid(
                "metrics",
                "risk_free_annualized",
                "risk_free_annualized must be true or false",
            ));
        }
    }
    Ok(())
}

fn validate_securities(config: &dyn ConfigPort) -> Result<(), RebalancerError> {
    config_securities(config).map(|_| ())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), RebalancerError> {
    let start_date = optional_date(config, "portfolio", "start_date")?;
    let end_date = optional_date(config, "portfolio", "end_date")?;

    if let (Some(start), Some(end)) = (start_date, end_date) {
        if start > end {
            return Err(invalid(
                "portfolio",
                "start_date",
                "start_date must not be after end_date",
            ));
        }
    }
    Ok(())
}

/// Parsed `[portfolio] securities`.
pub fn config_securities(config: &dyn ConfigPort) -> Result<Vec<String>, RebalancerError> {
    let raw = required_string(config, "portfolio", "securities")?;
    parse_securities(&raw).map_err(|e| invalid("portfolio", "securities", &e.to_string()))
}

/// Configured policy name, `threshold_ladder` when unset.
pub fn policy_name(config: &dyn ConfigPort) -> String {
    optional_string(config, "strategy", "policy")
        .map(|p| p.to_lowercase())
        .unwrap_or_else(|| "threshold_ladder".to_string())
}

/// Non-empty trimmed value of `key`, if set.
pub fn optional_string(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_string(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<String, RebalancerError> {
    optional_string(config, section, key).ok_or_else(|| RebalancerError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    })
}

/// Finite number under `key`; a value that does not parse is an error
/// rather than a silent default.
pub fn optional_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, RebalancerError> {
    optional_string(config, section, key)
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| invalid(section, key, &format!("'{s}' is not a number")))
        })
        .transpose()
}

pub fn optional_i64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<i64>, RebalancerError> {
    optional_string(config, section, key)
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| invalid(section, key, &format!("'{s}' is not an integer")))
        })
        .transpose()
}

pub fn optional_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<NaiveDate>, RebalancerError> {
    optional_string(config, section, key)
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| {
                invalid(
                    section,
                    key,
                    &format!("invalid {key} format, expected YYYY-MM-DD"),
                )
            })
        })
        .transpose()
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn invalid(section: &str, key: &str, reason: &str) -> RebalancerError {
    RebalancerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
