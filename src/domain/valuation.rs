//! Pure valuation functions: positions x prices -> values -> NAV -> weights.

use super::timeseries::Row;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValuationError {
    #[error("instrument count mismatch: {left} vs {right}")]
    ShapeMismatch { left: usize, right: usize },

    #[error("net asset value is zero")]
    ZeroNav,
}

/// Derived quantities of one date.
#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    pub values: Row,
    pub nav: f64,
    pub allocation: Row,
}

pub fn positions_to_values(positions: &Row, prices: &Row) -> Result<Row, ValuationError> {
    if positions.len() != prices.len() {
        return Err(ValuationError::ShapeMismatch {
            left: positions.len(),
            right: prices.len(),
        });
    }
    Ok(Row::new(
        positions
            .values()
            .iter()
            .zip(prices.values())
            .map(|(q, p)| q * p)
            .collect(),
    ))
}

pub fn values_to_nav(values: &Row) -> f64 {
    values.sum()
}

/// Fails with [`ValuationError::ZeroNav`] rather than producing infinities.
pub fn values_to_allocation(values: &Row, nav: f64) -> Result<Row, ValuationError> {
    if nav == 0.0 {
        return Err(ValuationError::ZeroNav);
    }
    Ok(Row::new(values.values().iter().map(|v| v / nav).collect()))
}

/// Values, NAV and allocation of `positions` marked at `prices`.
pub fn value_positions(positions: &Row, prices: &Row) -> Result<Valuation, ValuationError> {
    let values = positions_to_values(positions, prices)?;
    let nav = values_to_nav(&values);
    let allocation = values_to_allocation(&values, nav)?;
    Ok(Valuation {
        values,
        nav,
        allocation,
    })
}
