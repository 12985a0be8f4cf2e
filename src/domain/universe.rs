//! Security universe: the instrument schema shared by every dated table.
//!
//! Securities keep the order they were given in; the synthetic cash
//! instrument is always the last column.

use std::collections::{HashMap, HashSet};

/// Identifier of the synthetic cash instrument.
pub const CASH: &str = "cash";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in security list")]
    EmptyToken,

    #[error("duplicate security: {0}")]
    DuplicateSecurity(String),

    #[error("'cash' is reserved for the synthetic cash instrument")]
    ReservedCash,

    #[error("universe has no securities")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Universe {
    securities: Vec<String>,
    index: HashMap<String, usize>,
}

impl Universe {
    pub fn new(securities: Vec<String>) -> Result<Self, UniverseError> {
        if securities.is_empty() {
            return Err(UniverseError::Empty);
        }

        let mut index = HashMap::with_capacity(securities.len());
        for (i, security) in securities.iter().enumerate() {
            if security.trim().is_empty() {
                return Err(UniverseError::EmptyToken);
            }
            if security == CASH {
                return Err(UniverseError::ReservedCash);
            }
            if index.insert(security.clone(), i).is_some() {
                return Err(UniverseError::DuplicateSecurity(security.clone()));
            }
        }

        Ok(Self { securities, index })
    }

    pub fn securities(&self) -> &[String] {
        &self.securities
    }

    /// Number of columns, cash included.
    pub fn width(&self) -> usize {
        self.securities.len() + 1
    }

    pub fn cash_index(&self) -> usize {
        self.securities.len()
    }

    /// Column of an instrument; `cash` resolves to the cash column.
    pub fn index_of(&self, instrument: &str) -> Option<usize> {
        if instrument == CASH {
            Some(self.cash_index())
        } else {
            self.index.get(instrument).copied()
        }
    }

    pub fn instrument(&self, index: usize) -> Option<&str> {
        if index == self.cash_index() {
            Some(CASH)
        } else {
            self.securities.get(index).map(String::as_str)
        }
    }

    /// All instruments in column order, cash last.
    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.securities
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(CASH))
    }
}

/// Parse a comma separated security list, keeping the given order.
pub fn parse_securities(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut securities = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        if trimmed == CASH {
            return Err(UniverseError::ReservedCash);
        }
        if !seen.insert(trimmed.to_string()) {
            return Err(UniverseError::DuplicateSecurity(trimmed.to_string()));
        }
        securities.push(trimmed.to_string());
    }

    Ok(securities)
}
