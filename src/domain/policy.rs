//! Allocation policies consulted by the strategy driver.
//!
//! A policy maps the day's observables and the current weight of the
//! tracked security to a target weight. It never touches the portfolio.

use chrono::NaiveDate;
use std::fmt;

/// What a policy can see on a given date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observables {
    /// Indicator value, e.g. a volatility index close.
    pub signal: f64,
    /// Quote of the tracked security.
    pub price: f64,
}

pub trait AllocationPolicy {
    fn name(&self) -> &str;

    /// Name plus parameters, for display.
    fn describe(&self) -> String {
        self.name().to_string()
    }

    fn decide_allocation(&self, date: NaiveDate, observables: &Observables, current: f64) -> f64;
}

/// Any closure can act as a custom policy.
impl<F> AllocationPolicy for F
where
    F: Fn(NaiveDate, &Observables, f64) -> f64,
{
    fn name(&self) -> &str {
        "custom"
    }

    fn decide_allocation(&self, date: NaiveDate, observables: &Observables, current: f64) -> f64 {
        self(date, observables, current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rung {
    /// Lowest signal value (inclusive) this rung applies to.
    pub from: f64,
    pub allocation: f64,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum LadderError {
    #[error("invalid rung '{0}', expected <threshold>:<allocation>")]
    InvalidRung(String),

    #[error("thresholds must be strictly increasing ({previous} then {next})")]
    Unordered { previous: f64, next: f64 },
}

/// Step function of the signal: `base` below the first threshold, then the
/// allocation of the highest rung reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdLadder {
    base: f64,
    rungs: Vec<Rung>,
}

impl ThresholdLadder {
    pub fn new(base: f64, rungs: Vec<Rung>) -> Result<Self, LadderError> {
        for w in rungs.windows(2) {
            if w[0].from >= w[1].from {
                return Err(LadderError::Unordered {
                    previous: w[0].from,
                    next: w[1].from,
                });
            }
        }
        Ok(Self { base, rungs })
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn rungs(&self) -> &[Rung] {
        &self.rungs
    }

    pub fn allocation_for(&self, signal: f64) -> f64 {
        self.rungs
            .iter()
            .rev()
            .find(|r| signal >= r.from)
            .map_or(self.base, |r| r.allocation)
    }
}

impl Default for ThresholdLadder {
    /// Fully invested below 18, then 0.5, 0.25 and flat from 30.
    fn default() -> Self {
        ThresholdLadder {
            base: 1.0,
            rungs: vec![
                Rung {
                    from: 18.0,
                    allocation: 0.5,
                },
                Rung {
                    from: 23.0,
                    allocation: 0.25,
                },
                Rung {
                    from: 30.0,
                    allocation: 0.0,
                },
            ],
        }
    }
}

impl AllocationPolicy for ThresholdLadder {
    fn name(&self) -> &str {
        "threshold_ladder"
    }

    fn describe(&self) -> String {
        format!("threshold_ladder ({self})")
    }

    fn decide_allocation(&self, _date: NaiveDate, observables: &Observables, _current: f64) -> f64 {
        self.allocation_for(observables.signal)
    }
}

impl fmt::Display for ThresholdLadder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "base {}", self.base)?;
        for rung in &self.rungs {
            write!(f, ", >= {}: {}", rung.from, rung.allocation)?;
        }
        Ok(())
    }
}

/// Parse `"18:0.5, 23:0.25, 30:0"` into rungs.
pub fn parse_rungs(input: &str) -> Result<Vec<Rung>, LadderError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let (from, allocation) = token
                .split_once(':')
                .ok_or_else(|| LadderError::InvalidRung(token.to_string()))?;
            let parse = |v: &str| {
                v.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|x| x.is_finite())
                    .ok_or_else(|| LadderError::InvalidRung(token.to_string()))
            };
            Ok(Rung {
                from: parse(from)?,
                allocation: parse(allocation)?,
            })
        })
        .collect()
}

/// Buys into `allocation` while nothing is held, then lets the weight drift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuyAndHold {
    pub allocation: f64,
}

impl AllocationPolicy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn describe(&self) -> String {
        format!("buy_and_hold (allocation {})", self.allocation)
    }

    fn decide_allocation(&self, _date: NaiveDate, _observables: &Observables, current: f64) -> f64 {
        if current == 0.0 { self.allocation } else { current }
    }
}

/// Constant mix: restores the same weight every day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedWeight {
    pub allocation: f64,
}

impl AllocationPolicy for FixedWeight {
    fn name(&self) -> &str {
        "fixed_weight"
    }

    fn describe(&self) -> String {
        format!("fixed_weight (allocation {})", self.allocation)
    }

    fn decide_allocation(&self, _date: NaiveDate, _observables: &Observables, _current: f64) -> f64 {
        self.allocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn obs(signal: f64) -> Observables {
        Observables {
            signal,
            price: 100.0,
        }
    }

    #[test]
    fn default_ladder_boundaries() {
        let ladder = ThresholdLadder::default();
        assert_eq!(ladder.allocation_for(12.0), 1.0);
        assert_eq!(ladder.allocation_for(17.99), 1.0);
        assert_eq!(ladder.allocation_for(18.0), 0.5);
        assert_eq!(ladder.allocation_for(22.99), 0.5);
        assert_eq!(ladder.allocation_for(23.0), 0.25);
        assert_eq!(ladder.allocation_for(29.99), 0.25);
        assert_eq!(ladder.allocation_for(30.0), 0.0);
        assert_eq!(ladder.allocation_for(80.0), 0.0);
    }

    #[test]
    fn ladder_ignores_current_allocation() {
        let ladder = ThresholdLadder::default();
        assert_eq!(ladder.decide_allocation(today(), &obs(25.0), 1.0), 0.25);
        assert_eq!(ladder.decide_allocation(today(), &obs(25.0), 0.0), 0.25);
    }

    #[test]
    fn ladder_rejects_unordered_rungs() {
        let rungs = vec![
            Rung {
                from: 20.0,
                allocation: 0.5,
            },
            Rung {
                from: 20.0,
                allocation: 0.0,
            },
        ];
        assert_eq!(
            ThresholdLadder::new(1.0, rungs),
            Err(LadderError::Unordered {
                previous: 20.0,
                next: 20.0
            })
        );
    }

    #[test]
    fn ladder_without_rungs_is_constant() {
        let ladder = ThresholdLadder::new(0.6, vec![]).unwrap();
        assert_eq!(ladder.allocation_for(100.0), 0.6);
    }

    #[test]
    fn parse_default_rungs() {
        let rungs = parse_rungs("18:0.5, 23:0.25, 30:0").unwrap();
        let ladder = ThresholdLadder::new(1.0, rungs).unwrap();
        assert_eq!(ladder, ThresholdLadder::default());
    }

    #[test]
    fn parse_rejects_malformed_rungs() {
        assert!(matches!(parse_rungs("18"), Err(LadderError::InvalidRung(_))));
        assert!(matches!(parse_rungs("18:x"), Err(LadderError::InvalidRung(_))));
        assert!(matches!(parse_rungs("inf:1"), Err(LadderError::InvalidRung(_))));
    }

    #[test]
    fn ladder_display() {
        let ladder = ThresholdLadder::new(
            1.0,
            vec![Rung {
                from: 30.0,
                allocation: 0.0,
            }],
        )
        .unwrap();
        assert_eq!(ladder.to_string(), "base 1, >= 30: 0");
        assert_eq!(ladder.describe(), "threshold_ladder (base 1, >= 30: 0)");
    }

    #[test]
    fn buy_and_hold_only_enters_once() {
        let policy = BuyAndHold { allocation: 1.0 };
        assert_eq!(policy.decide_allocation(today(), &obs(50.0), 0.0), 1.0);
        assert_eq!(policy.decide_allocation(today(), &obs(50.0), 0.93), 0.93);
    }

    #[test]
    fn fixed_weight_is_constant() {
        let policy = FixedWeight { allocation: 0.6 };
        assert_eq!(policy.decide_allocation(today(), &obs(10.0), 0.9), 0.6);
    }

    #[test]
    fn closures_are_policies() {
        let policy = |_: NaiveDate, o: &Observables, _: f64| if o.price > 50.0 { 0.3 } else { 0.7 };
        assert_eq!(policy.name(), "custom");
        assert_eq!(policy.describe(), "custom");
        assert_eq!(policy.decide_allocation(today(), &obs(0.0), 0.0), 0.3);
    }
}
