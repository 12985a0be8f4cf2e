//! Core domain types and logic.

pub mod backtest;
pub mod config_validation;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod portfolio;
pub mod rebalance;
pub mod report;
pub mod timeseries;
pub mod universe;
pub mod valuation;
