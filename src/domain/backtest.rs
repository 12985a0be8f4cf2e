//! Strategy driver loop and backtest configuration.
//!
//! The driver walks the calendar one transition at a time: apply the day's
//! cashflow, ask the policy for a target weight of the tracked security and
//! either rebalance towards it or hold.

use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, info};

use super::error::RebalancerError;
use super::metrics::{ReturnOptions, ReturnTable, compute_returns};
use super::policy::{AllocationPolicy, Observables};
use super::portfolio::{Portfolio, PortfolioConfig, PortfolioSetup, StartingHoldings};
use super::rebalance::{RebalanceOutcome, RejectReason};
use super::timeseries::{Frame, Series};

pub const DEFAULT_ALLOCATION_TOLERANCE: f64 = 1e-9;

/// Which price of the next date a rebalance executes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionTiming {
    NextOpen,
    #[default]
    NextClose,
}

impl ExecutionTiming {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "next_open" => Some(ExecutionTiming::NextOpen),
            "next_close" => Some(ExecutionTiming::NextClose),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub initial_capital: f64,
    pub securities: Vec<String>,
    /// Security whose weight the policy controls.
    pub security: String,
    pub portfolio: PortfolioConfig,
    pub execution: ExecutionTiming,
    pub tolerance: f64,
    pub returns: ReturnOptions,
}

/// Inputs materialized before the simulation starts.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    pub quotes: Frame,
    pub opens: Option<Frame>,
    pub signal: Series,
    pub cashflows: Option<Frame>,
    pub risk_free: Option<Series>,
}

/// Source of the tracked security's execution price.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionPrices<'a> {
    NextClose,
    NextOpen(&'a Series),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Hold,
    Rebalanced { quantity: f64, price: f64 },
    Rejected(Vec<RejectReason>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub date: NaiveDate,
    pub next_date: NaiveDate,
    pub cashflow: f64,
    pub signal: f64,
    pub current: f64,
    pub target: f64,
    pub action: StepAction,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub portfolio: Portfolio,
    pub steps: Vec<StepRecord>,
    pub returns: ReturnTable,
}

impl BacktestResult {
    pub fn rebalance_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.action, StepAction::Rebalanced { .. }))
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.action, StepAction::Rejected(_)))
            .count()
    }
}

/// Drive `portfolio` from its first to its last date.
///
/// Invariants are asserted after every step; a breach ends the run.
pub fn run_strategy(
    portfolio: &mut Portfolio,
    policy: &dyn AllocationPolicy,
    security: &str,
    signal: &Series,
    execution: ExecutionPrices<'_>,
    tolerance: f64,
) -> Result<Vec<StepRecord>, RebalancerError> {
    let dates = portfolio.calendar().dates().to_vec();
    let mut steps = Vec::with_capacity(dates.len().saturating_sub(1));

    for pair in dates.windows(2) {
        let (date, next_date) = (pair[0], pair[1]);

        let cashflow = portfolio.apply_cashflows(date)?;
        portfolio.assert_invariants_on(date)?;

        let signal_value = signal
            .get(&date)
            .copied()
            .filter(|v| v.is_finite())
            .ok_or_else(|| RebalancerError::MissingData {
                column: "signal".into(),
                date,
            })?;
        let price = portfolio.quotes().value(date, security)?;
        let current = portfolio.allocation().value(date, security)?;
        let observables = Observables {
            signal: signal_value,
            price,
        };
        let target = policy.decide_allocation(date, &observables, current);
        if !target.is_finite() {
            return Err(RebalancerError::Validation {
                date,
                reason: format!("{} returned allocation {target}", policy.name()),
            });
        }

        let action = if (target - current).abs() > tolerance {
            let nav = portfolio.nav().value(date)?;
            let quantity = (target - current) * nav / price;
            let execution_price = match execution {
                ExecutionPrices::NextClose => portfolio.quotes().value(next_date, security)?,
                ExecutionPrices::NextOpen(opens) => {
                    opens.get(&next_date).copied().ok_or_else(|| {
                        RebalancerError::MissingData {
                            column: format!("{security} open"),
                            date: next_date,
                        }
                    })?
                }
            };

            debug!(
                %date,
                %next_date,
                current,
                target,
                quantity,
                execution_price,
                "allocation differs, rebalancing"
            );

            let changes = HashMap::from([(security.to_string(), quantity)]);
            let prices = HashMap::from([(security.to_string(), execution_price)]);
            match portfolio.rebalance(date, next_date, &changes, &prices)? {
                RebalanceOutcome::Applied => StepAction::Rebalanced {
                    quantity,
                    price: execution_price,
                },
                RebalanceOutcome::Rejected(reasons) => StepAction::Rejected(reasons),
            }
        } else {
            portfolio.hold(date, next_date)?;
            StepAction::Hold
        };
        portfolio.assert_invariants_on(next_date)?;

        steps.push(StepRecord {
            date,
            next_date,
            cashflow,
            signal: signal_value,
            current,
            target,
            action,
        });
    }

    Ok(steps)
}

/// Build a portfolio from `data`, run `policy` over it, validate the result
/// and derive its return table.
pub fn run_backtest(
    data: &MarketData,
    policy: &dyn AllocationPolicy,
    config: &BacktestConfig,
) -> Result<BacktestResult, RebalancerError> {
    if !config.securities.contains(&config.security) {
        return Err(RebalancerError::UnknownInstrument {
            instrument: config.security.clone(),
        });
    }

    let dates = trading_dates(data, config)?;

    let execution = match config.execution {
        ExecutionTiming::NextClose => ExecutionPrices::NextClose,
        ExecutionTiming::NextOpen => {
            let opens = data
                .opens
                .as_ref()
                .and_then(|f| f.column(&config.security))
                .ok_or_else(|| RebalancerError::DataSource {
                    reason: format!(
                        "next-open execution needs open prices for {}",
                        config.security
                    ),
                })?;
            ExecutionPrices::NextOpen(opens)
        }
    };

    let mut portfolio = Portfolio::new(PortfolioSetup {
        securities: config.securities.clone(),
        dates,
        quotes: data.quotes.clone(),
        cashflows: data.cashflows.clone(),
        start: StartingHoldings::Capital(config.initial_capital),
        config: config.portfolio.clone(),
    })?;

    info!(
        policy = policy.name(),
        security = %config.security,
        dates = portfolio.calendar().len(),
        "running strategy"
    );

    let steps = run_strategy(
        &mut portfolio,
        policy,
        &config.security,
        &data.signal,
        execution,
        config.tolerance,
    )?;
    portfolio.validate()?;

    let values = portfolio.nav().to_series();
    let risk_free = match &data.risk_free {
        Some(rates) => rates.clone(),
        None => values.keys().map(|&d| (d, 0.0)).collect(),
    };
    let returns = compute_returns(&values, &risk_free, config.returns);

    Ok(BacktestResult {
        portfolio,
        steps,
        returns,
    })
}

/// Dates on which the tracked security is quoted, within the configured bounds.
pub fn trading_dates(
    data: &MarketData,
    config: &BacktestConfig,
) -> Result<Vec<NaiveDate>, RebalancerError> {
    let quotes =
        data.quotes
            .column(&config.security)
            .ok_or_else(|| RebalancerError::DataSource {
                reason: format!("no quotes for {}", config.security),
            })?;

    let dates: Vec<NaiveDate> = quotes
        .keys()
        .copied()
        .filter(|d| config.start_date.is_none_or(|s| *d >= s))
        .filter(|d| config.end_date.is_none_or(|e| *d <= e))
        .collect();

    if dates.is_empty() {
        return Err(RebalancerError::InvalidCalendar {
            reason: format!("no quotes for {} in the configured range", config.security),
        });
    }
    Ok(dates)
}
