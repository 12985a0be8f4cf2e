//! Portfolio state and the transition engine.
//!
//! A [`Portfolio`] owns every dated table of one simulation. The first date
//! is seeded at construction; each later date is written exactly once by
//! [`Portfolio::rebalance`] or [`Portfolio::hold`].

use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::RebalancerError;
use super::rebalance::{
    LoanBound, RebalanceOutcome, RejectReason, check_interval, check_loan, check_shorts,
    clear_dust,
};
use super::timeseries::{Calendar, DatedSeries, DatedTable, Frame, Row, Schema};
use super::universe::{CASH, Universe};
use super::valuation::{self, Valuation};

pub const DEFAULT_INITIAL_CAPITAL: f64 = 1_000_000.0;

/// Tolerance on the allocation sum and NAV consistency checks.
pub const ALLOCATION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioConfig {
    /// Most negative cash value permitted, as a positive amount.
    pub max_loan: f64,
    /// Minimum calendar days between two executed rebalances.
    pub min_rebalance_interval: Option<i64>,
    pub loan_bound: LoanBound,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        PortfolioConfig {
            max_loan: 0.0,
            min_rebalance_interval: None,
            loan_bound: LoanBound::Inclusive,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartingHoldings {
    /// All capital in cash, nothing in securities.
    Capital(f64),
    /// Explicit quantities; unlisted instruments start at zero.
    Positions(HashMap<String, f64>),
}

impl Default for StartingHoldings {
    fn default() -> Self {
        StartingHoldings::Capital(DEFAULT_INITIAL_CAPITAL)
    }
}

/// Everything needed to build a portfolio.
#[derive(Debug, Clone, Default)]
pub struct PortfolioSetup {
    pub securities: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub quotes: Frame,
    pub cashflows: Option<Frame>,
    pub start: StartingHoldings,
    pub config: PortfolioConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    AllocationSum {
        date: NaiveDate,
        sum: f64,
    },
    LoanBreach {
        date: NaiveDate,
        cash_value: f64,
        max_loan: f64,
    },
    ShortPosition {
        date: NaiveDate,
        instrument: String,
        quantity: f64,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::AllocationSum { date, sum } => {
                write!(f, "{date}: allocation sums to {sum}")
            }
            InvariantViolation::LoanBreach {
                date,
                cash_value,
                max_loan,
            } => write!(f, "{date}: cash value {cash_value} breaches max loan {max_loan}"),
            InvariantViolation::ShortPosition {
                date,
                instrument,
                quantity,
            } => write!(f, "{date}: {instrument} is short {quantity}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Portfolio {
    schema: Arc<Schema>,
    config: PortfolioConfig,
    quotes: DatedTable,
    cashflows: DatedTable,
    positions: DatedTable,
    values: DatedTable,
    nav: DatedSeries,
    allocation: DatedTable,
    rebalance_prices: DatedTable,
    rebalances: DatedTable,
    last_trade_date: Option<NaiveDate>,
}

impl Portfolio {
    pub fn new(setup: PortfolioSetup) -> Result<Self, RebalancerError> {
        let universe = Universe::new(setup.securities)?;
        let calendar = Calendar::new(setup.dates)?;
        let schema = Arc::new(Schema { calendar, universe });

        let quotes = build_quotes(&schema, &setup.quotes)?;
        let cashflows = build_cashflows(&schema, setup.cashflows.as_ref())?;

        let mut portfolio = Portfolio {
            config: setup.config,
            quotes,
            cashflows,
            positions: DatedTable::new("positions", schema.clone()),
            values: DatedTable::new("values", schema.clone()),
            nav: DatedSeries::new("nav", schema.clone()),
            allocation: DatedTable::new("allocation", schema.clone()),
            rebalance_prices: DatedTable::new("rebalance prices", schema.clone()),
            rebalances: DatedTable::new("rebalances", schema.clone()),
            last_trade_date: None,
            schema,
        };

        let first = portfolio.schema.calendar.first();
        let seed = portfolio.seed_positions(&setup.start)?;
        let valuation = portfolio.valuation(first, &seed)?;
        portfolio.commit(first, seed, valuation)?;
        portfolio.assert_invariants()?;

        debug!(
            date = %first,
            nav = portfolio.nav.value(first)?,
            "portfolio seeded"
        );
        Ok(portfolio)
    }

    pub fn universe(&self) -> &Universe {
        &self.schema.universe
    }

    pub fn calendar(&self) -> &Calendar {
        &self.schema.calendar
    }

    pub fn config(&self) -> &PortfolioConfig {
        &self.config
    }

    pub fn last_trade_date(&self) -> Option<NaiveDate> {
        self.last_trade_date
    }

    pub fn quotes(&self) -> &DatedTable {
        &self.quotes
    }

    pub fn cashflows(&self) -> &DatedTable {
        &self.cashflows
    }

    pub fn positions(&self) -> &DatedTable {
        &self.positions
    }

    pub fn values(&self) -> &DatedTable {
        &self.values
    }

    pub fn nav(&self) -> &DatedSeries {
        &self.nav
    }

    pub fn allocation(&self) -> &DatedTable {
        &self.allocation
    }

    pub fn rebalance_prices(&self) -> &DatedTable {
        &self.rebalance_prices
    }

    pub fn rebalances(&self) -> &DatedTable {
        &self.rebalances
    }

    /// Carry the positions of `date` forward to `next_date` unchanged.
    pub fn hold(&mut self, date: NaiveDate, next_date: NaiveDate) -> Result<(), RebalancerError> {
        self.check_transition(date, next_date)?;
        let positions = self.positions.row(date)?.clone();
        let valuation = self.valuation(next_date, &positions)?;
        debug!(%date, %next_date, nav = valuation.nav, "hold");
        self.commit(next_date, positions, valuation)
    }

    /// Attempt to trade from `date` into `next_date`.
    ///
    /// `changes` maps securities to signed quantity changes and `prices` to
    /// their execution prices; the cash leg is derived. When any feasibility
    /// check fails nothing from the trade is committed and the step falls
    /// back to [`Portfolio::hold`].
    pub fn rebalance(
        &mut self,
        date: NaiveDate,
        next_date: NaiveDate,
        changes: &HashMap<String, f64>,
        prices: &HashMap<String, f64>,
    ) -> Result<RebalanceOutcome, RebalancerError> {
        self.check_transition(date, next_date)?;

        let universe = &self.schema.universe;
        let cash = universe.cash_index();
        let mut delta = Row::zeros(universe.width());
        let mut execution = self.quotes.row(next_date)?.clone();

        for (instrument, &quantity) in changes {
            let i = security_index(universe, instrument)?;
            if !quantity.is_finite() {
                return Err(RebalancerError::Validation {
                    date: next_date,
                    reason: format!("quantity change for {instrument} is {quantity}"),
                });
            }
            delta.set(i, quantity);
        }

        for (instrument, &price) in prices {
            let i = security_index(universe, instrument)?;
            if !price.is_finite() || price <= 0.0 {
                return Err(RebalancerError::InvalidPrice {
                    instrument: instrument.clone(),
                    date: next_date,
                    price,
                });
            }
            execution.set(i, price);
        }

        for (instrument, &quantity) in changes {
            if quantity != 0.0 && !prices.contains_key(instrument) {
                return Err(RebalancerError::MissingExecutionPrice {
                    instrument: instrument.clone(),
                });
            }
        }

        if delta.values().iter().all(|&q| q == 0.0) {
            debug!(%date, %next_date, "zero quantity change, holding");
            self.hold(date, next_date)?;
            return Ok(RebalanceOutcome::Applied);
        }

        let cash_leg: f64 = -(0..cash).map(|i| delta.get(i) * execution.get(i)).sum::<f64>();
        delta.set(cash, cash_leg);
        execution.set(cash, 1.0);

        let current = self.positions.row(date)?;
        let mut candidate = Row::new(
            current
                .values()
                .iter()
                .zip(delta.values())
                .map(|(q, d)| q + d)
                .collect(),
        );
        clear_dust(universe, current, &mut candidate);

        let values = valuation::positions_to_values(&candidate, self.quotes.row(next_date)?)
            .map_err(|source| RebalancerError::Valuation {
                date: next_date,
                source,
            })?;

        let mut reasons = Vec::new();
        reasons.extend(check_loan(
            values.get(cash),
            self.config.max_loan,
            self.config.loan_bound,
        ));
        reasons.extend(check_shorts(universe, &candidate));
        reasons.extend(check_interval(
            self.last_trade_date,
            next_date,
            self.config.min_rebalance_interval,
        ));

        if !reasons.is_empty() {
            for reason in &reasons {
                warn!(%date, %next_date, %reason, "rebalance rejected");
            }
            self.hold(date, next_date)?;
            return Ok(RebalanceOutcome::Rejected(reasons));
        }

        let nav = valuation::values_to_nav(&values);
        let allocation =
            valuation::values_to_allocation(&values, nav).map_err(|source| {
                RebalancerError::Valuation {
                    date: next_date,
                    source,
                }
            })?;

        debug!(%date, %next_date, cash_leg, nav, "rebalance applied");
        self.commit(
            next_date,
            candidate,
            Valuation {
                values,
                nav,
                allocation,
            },
        )?;
        self.rebalance_prices.insert(next_date, execution)?;
        self.rebalances.insert(next_date, delta)?;
        self.last_trade_date = Some(next_date);

        Ok(RebalanceOutcome::Applied)
    }

    /// Add the total cashflow of `date` to its cash position in place and
    /// re-derive that date's values. Returns the amount applied.
    pub fn apply_cashflows(&mut self, date: NaiveDate) -> Result<f64, RebalancerError> {
        let amount = self.cashflows.row(date)?.sum();
        if amount == 0.0 {
            return Ok(0.0);
        }

        let cash = self.schema.universe.cash_index();
        let mut positions = self.positions.row(date)?.clone();
        positions.set(cash, positions.get(cash) + amount);
        let valuation = self.valuation(date, &positions)?;

        debug!(%date, amount, nav = valuation.nav, "cashflow applied");
        self.positions.replace(date, positions)?;
        self.values.replace(date, valuation.values)?;
        self.nav.replace(date, valuation.nav)?;
        self.allocation.replace(date, valuation.allocation)?;
        Ok(amount)
    }

    /// Every invariant breach across populated dates. Reported, never fixed.
    pub fn sanity_check(&self) -> Vec<InvariantViolation> {
        self.schema
            .calendar
            .dates()
            .iter()
            .flat_map(|&date| self.violations_on(date))
            .collect()
    }

    /// Invariant breaches on one date; empty for an unwritten date.
    pub fn violations_on(&self, date: NaiveDate) -> Vec<InvariantViolation> {
        let universe = &self.schema.universe;
        let mut violations = Vec::new();
        let Some(positions) = self.positions.get_row(date) else {
            return violations;
        };

        if let Some(allocation) = self.allocation.get_row(date) {
            let sum = allocation.sum();
            if (sum - 1.0).abs() > ALLOCATION_TOLERANCE {
                violations.push(InvariantViolation::AllocationSum { date, sum });
            }
        }

        if let Some(values) = self.values.get_row(date) {
            let cash_value = values.get(universe.cash_index());
            if !self.config.loan_bound.permits(cash_value, self.config.max_loan) {
                violations.push(InvariantViolation::LoanBreach {
                    date,
                    cash_value,
                    max_loan: self.config.max_loan,
                });
            }
        }

        for reason in check_shorts(universe, positions) {
            if let RejectReason::ShortPosition {
                instrument,
                quantity,
            } = reason
            {
                violations.push(InvariantViolation::ShortPosition {
                    date,
                    instrument,
                    quantity,
                });
            }
        }

        violations
    }

    pub fn assert_invariants(&self) -> Result<(), RebalancerError> {
        fatal(self.sanity_check())
    }

    pub fn assert_invariants_on(&self, date: NaiveDate) -> Result<(), RebalancerError> {
        fatal(self.violations_on(date))
    }

    /// Structural validation of a completed run.
    pub fn validate(&self) -> Result<(), RebalancerError> {
        let cash = self.schema.universe.cash_index();

        for &date in self.schema.calendar.dates() {
            let positions =
                self.positions
                    .get_row(date)
                    .ok_or_else(|| RebalancerError::Validation {
                        date,
                        reason: "no positions written".into(),
                    })?;
            let values = self.values.row(date)?;
            let nav = self.nav.value(date)?;
            let allocation = self.allocation.row(date)?;

            if self.quotes.row(date)?.get(cash) != 1.0 {
                return Err(RebalancerError::Validation {
                    date,
                    reason: "cash quote is not 1".into(),
                });
            }
            if let Some(prices) = self.rebalance_prices.get_row(date) {
                if prices.get(cash) != 1.0 {
                    return Err(RebalancerError::Validation {
                        date,
                        reason: "cash rebalance price is not 1".into(),
                    });
                }
            }

            let sum = allocation.sum();
            if (sum - 1.0).abs() > ALLOCATION_TOLERANCE {
                return Err(RebalancerError::Validation {
                    date,
                    reason: format!("allocation sums to {sum}"),
                });
            }

            if (values.sum() - nav).abs() > ALLOCATION_TOLERANCE * nav.abs().max(1.0) {
                return Err(RebalancerError::Validation {
                    date,
                    reason: format!("nav {nav} differs from summed values {}", values.sum()),
                });
            }

            if positions.len() != values.len() {
                return Err(RebalancerError::Validation {
                    date,
                    reason: "positions and values differ in width".into(),
                });
            }
        }
        Ok(())
    }

    fn seed_positions(&self, start: &StartingHoldings) -> Result<Row, RebalancerError> {
        let universe = &self.schema.universe;
        let mut seed = Row::zeros(universe.width());
        match start {
            StartingHoldings::Capital(capital) => {
                seed.set(universe.cash_index(), *capital);
            }
            StartingHoldings::Positions(positions) => {
                for (instrument, &quantity) in positions {
                    let i = universe.index_of(instrument).ok_or_else(|| {
                        RebalancerError::UnknownInstrument {
                            instrument: instrument.clone(),
                        }
                    })?;
                    seed.set(i, quantity);
                }
            }
        }
        Ok(seed)
    }

    fn check_transition(&self, date: NaiveDate, next_date: NaiveDate) -> Result<(), RebalancerError> {
        let calendar = &self.schema.calendar;
        calendar.position(date)?;
        calendar.position(next_date)?;
        if calendar.successor(date) != Some(next_date) {
            return Err(RebalancerError::NonConsecutiveDates { date, next_date });
        }
        self.positions.row(date)?;
        if self.positions.is_populated(next_date) {
            return Err(RebalancerError::RowAlreadyPopulated {
                table: self.positions.name(),
                date: next_date,
            });
        }
        Ok(())
    }

    fn valuation(&self, date: NaiveDate, positions: &Row) -> Result<Valuation, RebalancerError> {
        valuation::value_positions(positions, self.quotes.row(date)?)
            .map_err(|source| RebalancerError::Valuation { date, source })
    }

    fn commit(
        &mut self,
        date: NaiveDate,
        positions: Row,
        valuation: Valuation,
    ) -> Result<(), RebalancerError> {
        self.positions.insert(date, positions)?;
        self.values.insert(date, valuation.values)?;
        self.nav.insert(date, valuation.nav)?;
        self.allocation.insert(date, valuation.allocation)
    }
}

fn fatal(violations: Vec<InvariantViolation>) -> Result<(), RebalancerError> {
    match violations.first() {
        None => Ok(()),
        Some(first) => Err(RebalancerError::InvariantViolation {
            count: violations.len(),
            first: first.to_string(),
        }),
    }
}

fn security_index(universe: &Universe, instrument: &str) -> Result<usize, RebalancerError> {
    if instrument == CASH {
        return Err(RebalancerError::CashNotTradable);
    }
    universe
        .index_of(instrument)
        .ok_or_else(|| RebalancerError::UnknownInstrument {
            instrument: instrument.to_string(),
        })
}

fn build_quotes(schema: &Arc<Schema>, frame: &Frame) -> Result<DatedTable, RebalancerError> {
    let universe = &schema.universe;
    let mut quotes = DatedTable::new("quotes", schema.clone());

    for &date in schema.calendar.dates() {
        let mut row = Row::zeros(universe.width());
        for (i, security) in universe.securities().iter().enumerate() {
            let price = frame.value(security, date)?;
            if !price.is_finite() || price <= 0.0 {
                return Err(RebalancerError::InvalidPrice {
                    instrument: security.clone(),
                    date,
                    price,
                });
            }
            row.set(i, price);
        }

        if let Some(cash_price) = frame.column(CASH).and_then(|s| s.get(&date)) {
            if *cash_price != 1.0 {
                return Err(RebalancerError::Validation {
                    date,
                    reason: format!("cash quote is {cash_price}, expected 1"),
                });
            }
        }
        row.set(universe.cash_index(), 1.0);
        quotes.insert(date, row)?;
    }
    Ok(quotes)
}

fn build_cashflows(
    schema: &Arc<Schema>,
    frame: Option<&Frame>,
) -> Result<DatedTable, RebalancerError> {
    let universe = &schema.universe;
    let calendar = &schema.calendar;
    let mut cashflows = DatedTable::new("cashflows", schema.clone());
    let mut rows: Vec<Row> = vec![Row::zeros(universe.width()); calendar.len()];

    if let Some(frame) = frame {
        for name in frame.column_names() {
            let column = universe.index_of(name).ok_or_else(|| {
                RebalancerError::UnknownInstrument {
                    instrument: name.to_string(),
                }
            })?;
            let series = frame.column(name).into_iter().flatten();
            for (&date, &amount) in series {
                if !amount.is_finite() {
                    return Err(RebalancerError::Validation {
                        date,
                        reason: format!("cashflow for {name} is {amount}"),
                    });
                }
                match calendar.position(date) {
                    Ok(i) => rows[i].set(column, amount),
                    Err(_) if amount == 0.0 => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }

    for (&date, row) in calendar.dates().iter().zip(rows) {
        cashflows.insert(date, row)?;
    }
    Ok(cashflows)
}
