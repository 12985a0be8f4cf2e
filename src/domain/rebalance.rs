//! Rebalance outcomes and feasibility checks.
//!
//! A rejected rebalance is not an error: the engine falls back to a hold
//! and reports every check that failed.

use chrono::NaiveDate;
use std::fmt;

use super::timeseries::Row;
use super::universe::Universe;

/// Relative dust tolerance on security quantities.
///
/// A candidate quantity within `QUANTITY_EPSILON * max(1, |prior|)` of zero
/// is committed as exactly zero.
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// How the cash value is compared against the loan limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoanBound {
    /// cash value >= -max_loan
    #[default]
    Inclusive,
    /// cash value > -max_loan
    Strict,
}

impl LoanBound {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "inclusive" => Some(LoanBound::Inclusive),
            "strict" => Some(LoanBound::Strict),
            _ => None,
        }
    }

    pub fn permits(self, cash_value: f64, max_loan: f64) -> bool {
        match self {
            LoanBound::Inclusive => cash_value >= -max_loan,
            LoanBound::Strict => cash_value > -max_loan,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    LoanLimit {
        cash_value: f64,
        max_loan: f64,
    },
    ShortPosition {
        instrument: String,
        quantity: f64,
    },
    RebalanceInterval {
        last_trade: NaiveDate,
        elapsed_days: i64,
        minimum_days: i64,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::LoanLimit {
                cash_value,
                max_loan,
            } => write!(f, "cash value {cash_value:.2} breaches max loan {max_loan:.2}"),
            RejectReason::ShortPosition {
                instrument,
                quantity,
            } => write!(f, "{instrument} quantity {quantity} would be short"),
            RejectReason::RebalanceInterval {
                last_trade,
                elapsed_days,
                minimum_days,
            } => write!(
                f,
                "{elapsed_days} day(s) since last trade on {last_trade}, minimum {minimum_days}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceOutcome {
    Applied,
    Rejected(Vec<RejectReason>),
}

impl RebalanceOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RebalanceOutcome::Applied)
    }

    pub fn reasons(&self) -> &[RejectReason] {
        match self {
            RebalanceOutcome::Applied => &[],
            RebalanceOutcome::Rejected(reasons) => reasons,
        }
    }
}

pub fn check_loan(cash_value: f64, max_loan: f64, bound: LoanBound) -> Option<RejectReason> {
    if bound.permits(cash_value, max_loan) {
        None
    } else {
        Some(RejectReason::LoanLimit {
            cash_value,
            max_loan,
        })
    }
}

/// Every non-cash instrument with a negative quantity.
pub fn check_shorts(universe: &Universe, positions: &Row) -> Vec<RejectReason> {
    universe
        .securities()
        .iter()
        .enumerate()
        .filter(|&(i, _)| positions.get(i) < -QUANTITY_EPSILON)
        .map(|(i, security)| RejectReason::ShortPosition {
            instrument: security.clone(),
            quantity: positions.get(i),
        })
        .collect()
}

pub fn check_interval(
    last_trade: Option<NaiveDate>,
    next_date: NaiveDate,
    minimum_days: Option<i64>,
) -> Option<RejectReason> {
    let (last_trade, minimum_days) = (last_trade?, minimum_days?);
    let elapsed_days = (next_date - last_trade).num_days();
    if elapsed_days >= minimum_days {
        None
    } else {
        Some(RejectReason::RebalanceInterval {
            last_trade,
            elapsed_days,
            minimum_days,
        })
    }
}

/// Snap security quantities left as rounding residue of `prior` to zero.
/// The cash column is never touched.
pub fn clear_dust(universe: &Universe, prior: &Row, candidate: &mut Row) {
    for i in 0..universe.securities().len() {
        let tolerance = QUANTITY_EPSILON * prior.get(i).abs().max(1.0);
        if candidate.get(i).abs() <= tolerance {
            candidate.set(i, 0.0);
        }
    }
}
