//! Date-indexed storage.
//!
//! Raw inputs arrive as loosely aligned [`Frame`]s. Everything the engine
//! writes lives in fixed-shape [`DatedTable`]s keyed by the shared
//! [`Schema`]: one calendar, one universe, cash always present.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::error::RebalancerError;
use super::universe::Universe;

/// A single date-indexed column.
pub type Series = BTreeMap<NaiveDate, f64>;

/// Named columns of date-indexed values, as read from a data source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: BTreeMap<String, Series>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, series: Series) {
        self.columns.insert(column.into(), series);
    }

    pub fn with_column(mut self, column: impl Into<String>, series: Series) -> Self {
        self.insert(column, series);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Series> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Sorted union of the dates of every column.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self
            .columns
            .values()
            .flat_map(|s| s.keys().copied())
            .collect();
        dates.sort_unstable();
        dates.dedup();
        dates
    }

    /// Value of `column` on `date`, failing when either is absent.
    pub fn value(&self, column: &str, date: NaiveDate) -> Result<f64, RebalancerError> {
        self.columns
            .get(column)
            .and_then(|s| s.get(&date))
            .copied()
            .ok_or_else(|| RebalancerError::MissingData {
                column: column.to_string(),
                date,
            })
    }
}

/// Strictly increasing sequence of trading dates.
#[derive(Debug, Clone, PartialEq)]
pub struct Calendar {
    dates: Vec<NaiveDate>,
    index: HashMap<NaiveDate, usize>,
}

impl Calendar {
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self, RebalancerError> {
        if dates.is_empty() {
            return Err(RebalancerError::InvalidCalendar {
                reason: "calendar has no dates".into(),
            });
        }
        if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(RebalancerError::InvalidCalendar {
                reason: format!("{} is not after {}", w[1], w[0]),
            });
        }

        let index = dates.iter().enumerate().map(|(i, &d)| (d, i)).collect();
        Ok(Self { dates, index })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first(&self) -> NaiveDate {
        self.dates[0]
    }

    pub fn last(&self) -> NaiveDate {
        self.dates[self.dates.len() - 1]
    }

    pub fn position(&self, date: NaiveDate) -> Result<usize, RebalancerError> {
        self.index
            .get(&date)
            .copied()
            .ok_or(RebalancerError::DateNotInCalendar { date })
    }

    pub fn successor(&self, date: NaiveDate) -> Option<NaiveDate> {
        self.index
            .get(&date)
            .and_then(|&i| self.dates.get(i + 1))
            .copied()
    }
}

/// Calendar and universe shared by every table of one portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub calendar: Calendar,
    pub universe: Universe,
}

/// One value per instrument, in universe column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Vec<f64>);

impl Row {
    pub fn new(values: Vec<f64>) -> Self {
        Row(values)
    }

    pub fn zeros(width: usize) -> Self {
        Row(vec![0.0; width])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }

    pub fn set(&mut self, index: usize, value: f64) {
        self.0[index] = value;
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }
}

/// Write-once rows of instrument values, one slot per calendar date.
#[derive(Debug, Clone)]
pub struct DatedTable {
    name: &'static str,
    schema: Arc<Schema>,
    rows: Vec<Option<Row>>,
}

impl DatedTable {
    pub fn new(name: &'static str, schema: Arc<Schema>) -> Self {
        let rows = vec![None; schema.calendar.len()];
        Self { name, schema, rows }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn row(&self, date: NaiveDate) -> Result<&Row, RebalancerError> {
        let i = self.schema.calendar.position(date)?;
        self.rows[i].as_ref().ok_or(RebalancerError::RowNotPopulated {
            table: self.name,
            date,
        })
    }

    /// Populated row, or `None` for an empty slot or an unknown date.
    pub fn get_row(&self, date: NaiveDate) -> Option<&Row> {
        self.schema
            .calendar
            .position(date)
            .ok()
            .and_then(|i| self.rows[i].as_ref())
    }

    pub fn value(&self, date: NaiveDate, instrument: &str) -> Result<f64, RebalancerError> {
        let column = self.schema.universe.index_of(instrument).ok_or_else(|| {
            RebalancerError::UnknownInstrument {
                instrument: instrument.to_string(),
            }
        })?;
        Ok(self.row(date)?.get(column))
    }

    pub fn is_populated(&self, date: NaiveDate) -> bool {
        self.get_row(date).is_some()
    }

    /// Write the row for `date`; each slot can only be written once.
    pub fn insert(&mut self, date: NaiveDate, row: Row) -> Result<(), RebalancerError> {
        let i = self.slot(date, &row)?;
        if self.rows[i].is_some() {
            return Err(RebalancerError::RowAlreadyPopulated {
                table: self.name,
                date,
            });
        }
        self.rows[i] = Some(row);
        Ok(())
    }

    /// Overwrite an already written row.
    pub fn replace(&mut self, date: NaiveDate, row: Row) -> Result<(), RebalancerError> {
        let i = self.slot(date, &row)?;
        if self.rows[i].is_none() {
            return Err(RebalancerError::RowNotPopulated {
                table: self.name,
                date,
            });
        }
        self.rows[i] = Some(row);
        Ok(())
    }

    /// Populated rows in calendar order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, &Row)> {
        self.schema
            .calendar
            .dates()
            .iter()
            .zip(&self.rows)
            .filter_map(|(&d, r)| r.as_ref().map(|r| (d, r)))
    }

    fn slot(&self, date: NaiveDate, row: &Row) -> Result<usize, RebalancerError> {
        let i = self.schema.calendar.position(date)?;
        let width = self.schema.universe.width();
        if row.len() != width {
            return Err(RebalancerError::Validation {
                date,
                reason: format!(
                    "{} row has {} columns, expected {}",
                    self.name,
                    row.len(),
                    width
                ),
            });
        }
        Ok(i)
    }
}

/// Write-once scalar per calendar date.
#[derive(Debug, Clone)]
pub struct DatedSeries {
    name: &'static str,
    schema: Arc<Schema>,
    values: Vec<Option<f64>>,
}

impl DatedSeries {
    pub fn new(name: &'static str, schema: Arc<Schema>) -> Self {
        let values = vec![None; schema.calendar.len()];
        Self {
            name,
            schema,
            values,
        }
    }

    pub fn value(&self, date: NaiveDate) -> Result<f64, RebalancerError> {
        let i = self.schema.calendar.position(date)?;
        self.values[i].ok_or(RebalancerError::RowNotPopulated {
            table: self.name,
            date,
        })
    }

    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.schema
            .calendar
            .position(date)
            .ok()
            .and_then(|i| self.values[i])
    }

    pub fn insert(&mut self, date: NaiveDate, value: f64) -> Result<(), RebalancerError> {
        let i = self.schema.calendar.position(date)?;
        if self.values[i].is_some() {
            return Err(RebalancerError::RowAlreadyPopulated {
                table: self.name,
                date,
            });
        }
        self.values[i] = Some(value);
        Ok(())
    }

    pub fn replace(&mut self, date: NaiveDate, value: f64) -> Result<(), RebalancerError> {
        let i = self.schema.calendar.position(date)?;
        if self.values[i].is_none() {
            return Err(RebalancerError::RowNotPopulated {
                table: self.name,
                date,
            });
        }
        self.values[i] = Some(value);
        Ok(())
    }

    /// Populated values in calendar order.
    pub fn to_series(&self) -> Series {
        self.schema
            .calendar
            .dates()
            .iter()
            .zip(&self.values)
            .filter_map(|(&d, v)| v.map(|v| (d, v)))
            .collect()
    }
}
