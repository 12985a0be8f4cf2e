//! Performance metrics derived from a realized value series.
//!
//! Pure functions: nothing here reads or writes portfolio state.

use chrono::NaiveDate;

use super::timeseries::Series;

pub const DEFAULT_ANNUALIZATION_FACTOR: f64 = 360.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnOptions {
    /// Whether the risk-free series is quoted as an annual rate.
    pub risk_free_annualized: bool,
    pub annualization_factor: f64,
}

impl Default for ReturnOptions {
    fn default() -> Self {
        ReturnOptions {
            risk_free_annualized: true,
            annualization_factor: DEFAULT_ANNUALIZATION_FACTOR,
        }
    }
}

/// One date of the return table. Cells are `None` where the value is
/// undefined (first date, missing risk-free rate).
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnRow {
    pub date: NaiveDate,
    pub value: f64,
    pub daily_return: Option<f64>,
    pub daily_return_ann: Option<f64>,
    pub total_return: Option<f64>,
    pub risk_free_rate: Option<f64>,
    pub risk_free_rate_daily: Option<f64>,
    pub excess_return: Option<f64>,
    pub excess_return_daily: Option<f64>,
    pub daily_pnl: Option<f64>,
    pub total_pnl: Option<f64>,
}

impl ReturnRow {
    /// Cells in [`RETURN_COLUMNS`] order.
    pub fn cells(&self) -> [Option<f64>; 10] {
        [
            Some(self.value),
            self.daily_return,
            self.daily_return_ann,
            self.total_return,
            self.risk_free_rate,
            self.risk_free_rate_daily,
            self.excess_return,
            self.excess_return_daily,
            self.daily_pnl,
            self.total_pnl,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnTable {
    pub options: ReturnOptions,
    pub rows: Vec<ReturnRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSummary {
    pub final_value: f64,
    pub total_return: f64,
    pub total_pnl: f64,
    pub mean_daily_return_ann: f64,
    pub sharpe_ratio: f64,
}

/// Column names of the return table, in output order.
pub const RETURN_COLUMNS: [&str; 10] = [
    "value",
    "daily return",
    "daily return ann",
    "total return",
    "risk free rate",
    "risk free rate daily",
    "excess return",
    "excess return daily",
    "daily PnL",
    "total PnL",
];

/// Build the return table of `values` against `risk_free`.
///
/// Risk-free rates are matched by date; dates without a rate leave the
/// risk-free derived cells empty.
pub fn compute_returns(values: &Series, risk_free: &Series, options: ReturnOptions) -> ReturnTable {
    let factor = options.annualization_factor;
    let mut rows = Vec::with_capacity(values.len());
    let mut previous: Option<f64> = None;
    let mut growth: Option<f64> = None;
    let mut cumulative_pnl: Option<f64> = None;

    for (&date, &value) in values {
        let daily_return = previous.map(|p| value / p - 1.0);
        let daily_pnl = previous.map(|p| value - p);

        if let Some(r) = daily_return {
            growth = Some(growth.unwrap_or(1.0) * (1.0 + r));
        }
        if let Some(pnl) = daily_pnl {
            cumulative_pnl = Some(cumulative_pnl.unwrap_or(0.0) + pnl);
        }

        let daily_return_ann = daily_return.map(|r| (1.0 + r).powf(factor) - 1.0);
        let risk_free_rate = risk_free.get(&date).copied();

        let (risk_free_rate_daily, excess_return, excess_return_daily) =
            if options.risk_free_annualized {
                let rf_daily = risk_free_rate.map(|rf| (1.0 + rf).powf(1.0 / factor) - 1.0);
                (
                    rf_daily,
                    daily_return_ann.zip(risk_free_rate).map(|(r, rf)| r - rf),
                    daily_return.zip(rf_daily).map(|(r, rf)| r - rf),
                )
            } else {
                (
                    None,
                    daily_return.zip(risk_free_rate).map(|(r, rf)| r - rf),
                    None,
                )
            };

        rows.push(ReturnRow {
            date,
            value,
            daily_return,
            daily_return_ann,
            total_return: daily_return.and(growth.map(|g| g - 1.0)),
            risk_free_rate,
            risk_free_rate_daily,
            excess_return,
            excess_return_daily,
            daily_pnl,
            total_pnl: daily_pnl.and(cumulative_pnl),
        });
        previous = Some(value);
    }

    ReturnTable { options, rows }
}

/// `mean / std`, optionally scaled (e.g. by sqrt(252)).
pub fn sharpe_ratio(mean: f64, std: f64, multiply_by: Option<f64>) -> f64 {
    let sharpe = mean / std;
    match multiply_by {
        Some(m) => sharpe * m,
        None => sharpe,
    }
}

/// Mean and sample standard deviation of the present values.
fn mean_std(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let values: Vec<f64> = values.collect();
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}

impl ReturnTable {
    /// Sharpe ratio of the daily excess returns. With a flat (non-annualized)
    /// risk-free rate the excess return column is used instead.
    pub fn sharpe(&self, multiply_by: Option<f64>) -> Option<f64> {
        let excess = self.rows.iter().filter_map(|r| {
            if self.options.risk_free_annualized {
                r.excess_return_daily
            } else {
                r.excess_return
            }
        });
        let (mean, std) = mean_std(excess)?;
        if std == 0.0 {
            return None;
        }
        Some(sharpe_ratio(mean, std, multiply_by))
    }

    pub fn summary(&self) -> Option<ReturnSummary> {
        let last = self.rows.last()?;
        let daily: Vec<f64> = self.rows.iter().filter_map(|r| r.daily_return).collect();
        let mean_daily = if daily.is_empty() {
            0.0
        } else {
            daily.iter().sum::<f64>() / daily.len() as f64
        };

        Some(ReturnSummary {
            final_value: last.value,
            total_return: last.total_return.unwrap_or(0.0),
            total_pnl: last.total_pnl.unwrap_or(0.0),
            mean_daily_return_ann: (1.0 + mean_daily).powf(self.options.annualization_factor)
                - 1.0,
            sharpe_ratio: self
                .sharpe(Some(self.options.annualization_factor.sqrt()))
                .unwrap_or(0.0),
        })
    }
}
