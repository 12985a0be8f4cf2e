//! Data access port trait.

use crate::domain::error::RebalancerError;
use crate::domain::timeseries::Frame;
use chrono::NaiveDate;

pub trait DataPort {
    /// Load the named frame, keeping only dates within the optional bounds.
    fn load_frame(
        &self,
        name: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Frame, RebalancerError>;
}
