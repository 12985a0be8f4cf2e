//! CSV file data adapter.
//!
//! Each frame is a wide file `<name>.csv` with a `date` column followed by
//! one column per series. Empty cells are missing values.

use crate::domain::error::RebalancerError;
use crate::domain::timeseries::{Frame, Series};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", name))
    }
}

impl DataPort for CsvAdapter {
    fn load_frame(
        &self,
        name: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Frame, RebalancerError> {
        let path = self.csv_path(name);
        let content = fs::read_to_string(&path).map_err(|e| RebalancerError::DataSource {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = rdr
            .headers()
            .map_err(|e| RebalancerError::DataSource {
                reason: format!("CSV header error in {}: {}", path.display(), e),
            })?
            .clone();
        if headers.get(0).map(str::to_lowercase).as_deref() != Some("date") {
            return Err(RebalancerError::DataSource {
                reason: format!("{}: first column must be date", path.display()),
            });
        }
        let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
        let mut series: Vec<Series> = vec![Series::new(); columns.len()];

        for result in rdr.records() {
            let record = result.map_err(|e| RebalancerError::DataSource {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;

            let date_str = record.get(0).ok_or_else(|| RebalancerError::DataSource {
                reason: "missing date column".into(),
            })?;
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
                RebalancerError::DataSource {
                    reason: format!("invalid date '{}' in {}: {}", date_str, path.display(), e),
                }
            })?;

            if start_date.is_some_and(|s| date < s) || end_date.is_some_and(|e| date > e) {
                continue;
            }

            for (i, column) in columns.iter().enumerate() {
                let cell = record.get(i + 1).unwrap_or("");
                if cell.is_empty() {
                    continue;
                }
                let value: f64 = cell.parse().map_err(|e| RebalancerError::DataSource {
                    reason: format!("invalid {} value '{}' on {}: {}", column, cell, date, e),
                })?;
                if !value.is_finite() {
                    return Err(RebalancerError::DataSource {
                        reason: format!("non-finite {} value '{}' on {}", column, cell, date),
                    });
                }
                if series[i].insert(date, value).is_some() {
                    return Err(RebalancerError::DataSource {
                        reason: format!("duplicate date {} in {}", date, path.display()),
                    });
                }
            }
        }

        debug!(
            path = %path.display(),
            columns = columns.len(),
            "frame loaded"
        );
        Ok(columns
            .into_iter()
            .zip(series)
            .fold(Frame::new(), |frame, (column, s)| frame.with_column(column, s)))
    }
}
