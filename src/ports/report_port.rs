//! Report output port trait.

use std::path::Path;

use crate::domain::error::RebalancerError;
use crate::domain::metrics::ReturnTable;
use crate::domain::report::CombinedReport;

/// Port for writing simulation results.
pub trait ReportPort {
    fn write_report(&self, report: &CombinedReport, path: &Path) -> Result<(), RebalancerError>;

    fn write_returns(&self, returns: &ReturnTable, path: &Path) -> Result<(), RebalancerError>;
}
