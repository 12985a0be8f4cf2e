//! CSV report adapter implementing ReportPort.
//!
//! The combined report carries a two-line header: attribute names on the
//! first line, instrument names on the second. Missing cells are empty.

use std::path::Path;

use crate::domain::error::RebalancerError;
use crate::domain::metrics::{RETURN_COLUMNS, ReturnTable};
use crate::domain::report::CombinedReport;
use crate::ports::report_port::ReportPort;

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn format_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_error(path: &Path, e: csv::Error) -> RebalancerError {
    RebalancerError::Io(std::io::Error::other(format!(
        "failed to write {}: {}",
        path.display(),
        e
    )))
}

impl ReportPort for CsvReportAdapter {
    fn write_report(&self, report: &CombinedReport, path: &Path) -> Result<(), RebalancerError> {
        let mut wtr = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
        let columns = report.columns();

        let attributes = std::iter::once("date").chain(columns.iter().map(|(a, _)| *a));
        wtr.write_record(attributes)
            .map_err(|e| csv_error(path, e))?;
        let instruments = std::iter::once("").chain(columns.iter().map(|(_, i)| *i));
        wtr.write_record(instruments)
            .map_err(|e| csv_error(path, e))?;

        for row in report.rows() {
            let record = std::iter::once(row.date.to_string())
                .chain(row.cells.iter().map(|&c| format_cell(c)))
                .chain(std::iter::once(row.nav.to_string()));
            wtr.write_record(record).map_err(|e| csv_error(path, e))?;
        }

        wtr.flush()?;
        Ok(())
    }

    fn write_returns(&self, returns: &ReturnTable, path: &Path) -> Result<(), RebalancerError> {
        let mut wtr = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;

        wtr.write_record(std::iter::once("date").chain(RETURN_COLUMNS))
            .map_err(|e| csv_error(path, e))?;
        for row in &returns.rows {
            let record = std::iter::once(row.date.to_string())
                .chain(row.cells().into_iter().map(format_cell));
            wtr.write_record(record).map_err(|e| csv_error(path, e))?;
        }

        wtr.flush()?;
        Ok(())
    }
}
