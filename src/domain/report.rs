//! Combined per-date view of every portfolio table.

use chrono::NaiveDate;

use super::error::RebalancerError;
use super::portfolio::Portfolio;
use super::timeseries::DatedTable;

/// Attribute groups of the combined report, in column order. Each group has
/// one column per instrument; `nav` follows as a single column.
pub const REPORT_ATTRIBUTES: [&str; 7] = [
    "price",
    "cashflow",
    "weight",
    "quantity",
    "value",
    "rebalance quantity",
    "rebalance price",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub date: NaiveDate,
    /// Attribute-major cells; rebalance cells are `None` on hold dates.
    pub cells: Vec<Option<f64>>,
    pub nav: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombinedReport {
    instruments: Vec<String>,
    rows: Vec<ReportRow>,
}

impl CombinedReport {
    /// Flatten a fully populated portfolio into one row per date.
    pub fn from_portfolio(portfolio: &Portfolio) -> Result<Self, RebalancerError> {
        let instruments: Vec<String> = portfolio
            .universe()
            .instruments()
            .map(str::to_string)
            .collect();
        let width = instruments.len();

        let tables: [&DatedTable; 7] = [
            portfolio.quotes(),
            portfolio.cashflows(),
            portfolio.allocation(),
            portfolio.positions(),
            portfolio.values(),
            portfolio.rebalances(),
            portfolio.rebalance_prices(),
        ];

        let mut rows = Vec::with_capacity(portfolio.calendar().len());
        for &date in portfolio.calendar().dates() {
            let mut cells = Vec::with_capacity(tables.len() * width);
            for (table, attribute) in tables.iter().zip(REPORT_ATTRIBUTES) {
                match table.get_row(date) {
                    Some(row) => cells.extend(row.values().iter().map(|&v| Some(v))),
                    None if attribute.starts_with("rebalance") => {
                        cells.extend(std::iter::repeat_n(None, width))
                    }
                    None => {
                        return Err(RebalancerError::RowNotPopulated {
                            table: table.name(),
                            date,
                        });
                    }
                }
            }
            rows.push(ReportRow {
                date,
                cells,
                nav: portfolio.nav().value(date)?,
            });
        }

        Ok(Self { instruments, rows })
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    /// `(attribute, instrument)` header pairs, `nav` last with an empty
    /// instrument.
    pub fn columns(&self) -> Vec<(&str, &str)> {
        REPORT_ATTRIBUTES
            .iter()
            .flat_map(|&a| self.instruments.iter().map(move |i| (a, i.as_str())))
            .chain(std::iter::once(("nav", "")))
            .collect()
    }

    pub fn cell(&self, date: NaiveDate, attribute: &str, instrument: &str) -> Option<f64> {
        let group = REPORT_ATTRIBUTES.iter().position(|&a| a == attribute)?;
        let column = self.instruments.iter().position(|i| i == instrument)?;
        let row = self.rows.iter().find(|r| r.date == date)?;
        row.cells[group * self.instruments.len() + column]
    }
}
