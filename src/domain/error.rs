//! Domain error types.

use chrono::NaiveDate;

use super::universe::UniverseError;
use super::valuation::ValuationError;

/// Top-level error type for rebalancer.
#[derive(Debug, thiserror::Error)]
pub enum RebalancerError {
    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Universe(#[from] UniverseError),

    #[error("invalid calendar: {reason}")]
    InvalidCalendar { reason: String },

    #[error("missing {column} value on {date}")]
    MissingData { column: String, date: NaiveDate },

    #[error("invalid price for {instrument} on {date}: {price}")]
    InvalidPrice {
        instrument: String,
        date: NaiveDate,
        price: f64,
    },

    #[error("unknown instrument: {instrument}")]
    UnknownInstrument { instrument: String },

    #[error("cash leg is derived and cannot be traded directly")]
    CashNotTradable,

    #[error("missing execution price for {instrument}")]
    MissingExecutionPrice { instrument: String },

    #[error("date {date} is not in the calendar")]
    DateNotInCalendar { date: NaiveDate },

    #[error("{next_date} does not directly follow {date} in the calendar")]
    NonConsecutiveDates { date: NaiveDate, next_date: NaiveDate },

    #[error("no {table} row on {date}")]
    RowNotPopulated { table: &'static str, date: NaiveDate },

    #[error("{table} row on {date} is already written")]
    RowAlreadyPopulated { table: &'static str, date: NaiveDate },

    #[error("valuation failed on {date}: {source}")]
    Valuation {
        date: NaiveDate,
        #[source]
        source: ValuationError,
    },

    #[error("validation failed on {date}: {reason}")]
    Validation { date: NaiveDate, reason: String },

    #[error("{count} invariant violation(s), first: {first}")]
    InvariantViolation { count: usize, first: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&RebalancerError> for std::process::ExitCode {
    fn from(err: &RebalancerError) -> Self {
        let code: u8 = match err {
            RebalancerError::Io(_) => 1,
            RebalancerError::ConfigParse { .. }
            | RebalancerError::ConfigMissing { .. }
            | RebalancerError::ConfigInvalid { .. } => 2,
            RebalancerError::DataSource { .. } | RebalancerError::MissingData { .. } => 3,
            RebalancerError::Universe(_)
            | RebalancerError::InvalidCalendar { .. }
            | RebalancerError::InvalidPrice { .. }
            | RebalancerError::UnknownInstrument { .. }
            | RebalancerError::CashNotTradable
            | RebalancerError::MissingExecutionPrice { .. }
            | RebalancerError::DateNotInCalendar { .. }
            | RebalancerError::NonConsecutiveDates { .. }
            | RebalancerError::RowNotPopulated { .. }
            | RebalancerError::RowAlreadyPopulated { .. }
            | RebalancerError::Valuation { .. } => 4,
            RebalancerError::Validation { .. } | RebalancerError::InvariantViolation { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = RebalancerError::MissingData {
            column: "VFINX".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        };
        assert_eq!(err.to_string(), "missing VFINX value on 2024-01-15");

        let err = RebalancerError::ConfigInvalid {
            section: "portfolio".into(),
            key: "max_loan".into(),
            reason: "max_loan must be non-negative".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid config value [portfolio] max_loan: max_loan must be non-negative"
        );
    }

    #[test]
    fn universe_errors_convert() {
        let err: RebalancerError = UniverseError::ReservedCash.into();
        assert!(matches!(err, RebalancerError::Universe(UniverseError::ReservedCash)));
    }

    #[test]
    fn valuation_error_keeps_source() {
        use std::error::Error;
        let err = RebalancerError::Valuation {
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            source: ValuationError::ZeroNav,
        };
        assert!(err.source().is_some());
    }
}
