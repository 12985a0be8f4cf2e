#![allow(dead_code)]

use chrono::NaiveDate;
use rebalancer::domain::backtest::{BacktestConfig, DEFAULT_ALLOCATION_TOLERANCE, ExecutionTiming, MarketData};
use rebalancer::domain::error::RebalancerError;
use rebalancer::domain::metrics::ReturnOptions;
use rebalancer::domain::portfolio::{PortfolioConfig, PortfolioSetup, StartingHoldings};
use rebalancer::domain::timeseries::{Frame, Series};
use rebalancer::ports::data_port::DataPort;
use std::collections::HashMap;

pub struct MockDataPort {
    pub frames: HashMap<String, Frame>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            frames: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_frame(mut self, name: &str, frame: Frame) -> Self {
        self.frames.insert(name.to_string(), frame);
        self
    }

    pub fn with_error(mut self, name: &str, reason: &str) -> Self {
        self.errors.insert(name.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn load_frame(
        &self,
        name: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Frame, RebalancerError> {
        if let Some(reason) = self.errors.get(name) {
            return Err(RebalancerError::DataSource {
                reason: reason.clone(),
            });
        }
        let frame = self
            .frames
            .get(name)
            .ok_or_else(|| RebalancerError::DataSource {
                reason: format!("no frame named {name}"),
            })?;

        let mut filtered = Frame::new();
        for column in frame.column_names() {
            let series: Series = frame
                .column(column)
                .unwrap()
                .iter()
                .filter(|(d, _)| start_date.is_none_or(|s| **d >= s))
                .filter(|(d, _)| end_date.is_none_or(|e| **d <= e))
                .map(|(&d, &v)| (d, v))
                .collect();
            filtered.insert(column, series);
        }
        Ok(filtered)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// `count` consecutive calendar days from 2024-01-01.
pub fn dates(count: usize) -> Vec<NaiveDate> {
    (0..count)
        .map(|i| date(2024, 1, 1) + chrono::Duration::days(i as i64))
        .collect()
}

/// Values on consecutive days from 2024-01-01.
pub fn series(values: &[f64]) -> Series {
    dates(values.len()).into_iter().zip(values.iter().copied()).collect()
}

pub fn single_security_setup(prices: &[f64], capital: f64) -> PortfolioSetup {
    PortfolioSetup {
        securities: vec!["VFINX".into()],
        dates: dates(prices.len()),
        quotes: Frame::new().with_column("VFINX", series(prices)),
        cashflows: None,
        start: StartingHoldings::Capital(capital),
        config: PortfolioConfig::default(),
    }
}

pub fn two_security_setup(first: &[f64], second: &[f64], capital: f64) -> PortfolioSetup {
    PortfolioSetup {
        securities: vec!["VFINX".into(), "VBMFX".into()],
        dates: dates(first.len()),
        quotes: Frame::new()
            .with_column("VFINX", series(first))
            .with_column("VBMFX", series(second)),
        cashflows: None,
        start: StartingHoldings::Capital(capital),
        config: PortfolioConfig::default(),
    }
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig {
        start_date: None,
        end_date: None,
        initial_capital: 1_000_000.0,
        securities: vec!["VFINX".into()],
        security: "VFINX".into(),
        portfolio: PortfolioConfig::default(),
        execution: ExecutionTiming::NextClose,
        tolerance: DEFAULT_ALLOCATION_TOLERANCE,
        returns: ReturnOptions::default(),
    }
}

pub fn market(prices: &[f64], signal: &[f64]) -> MarketData {
    MarketData {
        quotes: Frame::new().with_column("VFINX", series(prices)),
        signal: series(signal),
        ..MarketData::default()
    }
}

pub fn trade(security: &str, quantity: f64, price: f64) -> (HashMap<String, f64>, HashMap<String, f64>) {
    (
        HashMap::from([(security.to_string(), quantity)]),
        HashMap::from([(security.to_string(), price)]),
    )
}
