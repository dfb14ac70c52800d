//! Fine schedule
//!
//! One canonical, configuration-driven tier table maps speed excess to a
//! monetary amount. The constructor rejects tables that are not strictly
//! ascending in excess or not monotonic non-decreasing in amount, so every
//! consumer of a [`FineSchedule`] can rely on those properties.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One tier: excesses up to and including `max_excess` km/h cost `amount`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FineBand {
    pub max_excess: u16,
    pub amount: u32,
}

/// Errors rejecting an invalid tier table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Fine schedule has no bands")]
    Empty,

    #[error("Band excess bounds must be strictly ascending: {prev} then {next}")]
    NonAscendingExcess { prev: u16, next: u16 },

    #[error("Band amounts must be non-decreasing: {prev} then {next}")]
    DecreasingAmount { prev: u32, next: u32 },
}

/// Declarative form of a schedule, as loaded from a configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FineScheduleSpec {
    pub bands: Vec<FineBand>,
    /// Amount for excesses beyond the last band
    pub top_amount: u32,
}

impl FineScheduleSpec {
    pub fn build(self) -> Result<FineSchedule, ScheduleError> {
        FineSchedule::new(self.bands, self.top_amount)
    }
}

/// Validated tier table; see module docs for its invariants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FineSchedule {
    bands: Vec<FineBand>,
    top_amount: u32,
}

impl FineSchedule {
    pub fn new(bands: Vec<FineBand>, top_amount: u32) -> Result<Self, ScheduleError> {
        if bands.is_empty() {
            return Err(ScheduleError::Empty);
        }
        for pair in bands.windows(2) {
            if pair[1].max_excess <= pair[0].max_excess {
                return Err(ScheduleError::NonAscendingExcess {
                    prev: pair[0].max_excess,
                    next: pair[1].max_excess,
                });
            }
            if pair[1].amount < pair[0].amount {
                return Err(ScheduleError::DecreasingAmount {
                    prev: pair[0].amount,
                    next: pair[1].amount,
                });
            }
        }
        if top_amount < bands[bands.len() - 1].amount {
            return Err(ScheduleError::DecreasingAmount {
                prev: bands[bands.len() - 1].amount,
                next: top_amount,
            });
        }
        Ok(FineSchedule { bands, top_amount })
    }

    /// Amount owed for a speed excess in km/h.
    ///
    /// An excess of zero or less is not a violation and costs nothing;
    /// such readings should not normally reach this function, but it
    /// never fails on them.
    pub fn amount(&self, excess: i32) -> u32 {
        if excess <= 0 {
            return 0;
        }
        let excess = excess.min(u16::MAX as i32) as u16;
        for band in &self.bands {
            if excess <= band.max_excess {
                return band.amount;
            }
        }
        self.top_amount
    }

    pub fn bands(&self) -> &[FineBand] {
        &self.bands
    }

    pub fn top_amount(&self) -> u32 {
        self.top_amount
    }
}

impl Default for FineSchedule {
    /// The canonical tier table
    fn default() -> Self {
        FineSchedule::new(
            vec![
                FineBand { max_excess: 10, amount: 50 },
                FineBand { max_excess: 20, amount: 100 },
                FineBand { max_excess: 30, amount: 200 },
                FineBand { max_excess: 40, amount: 350 },
            ],
            500,
        )
        .expect("default schedule is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_amounts() {
        let schedule = FineSchedule::default();
        assert_eq!(schedule.amount(0), 0);
        assert_eq!(schedule.amount(-5), 0);
        assert_eq!(schedule.amount(5), 50);
        assert_eq!(schedule.amount(10), 50);
        assert_eq!(schedule.amount(11), 100);
        assert_eq!(schedule.amount(20), 100);
        assert_eq!(schedule.amount(21), 200);
        assert_eq!(schedule.amount(30), 200);
        assert_eq!(schedule.amount(31), 350);
        assert_eq!(schedule.amount(40), 350);
        assert_eq!(schedule.amount(41), 500);
        assert_eq!(schedule.amount(250), 500);
    }

    #[test]
    fn test_rejects_empty_table() {
        assert_eq!(FineSchedule::new(vec![], 500), Err(ScheduleError::Empty));
    }

    #[test]
    fn test_rejects_non_ascending_excess() {
        let result = FineSchedule::new(
            vec![
                FineBand { max_excess: 20, amount: 50 },
                FineBand { max_excess: 10, amount: 100 },
            ],
            500,
        );
        assert_eq!(
            result,
            Err(ScheduleError::NonAscendingExcess { prev: 20, next: 10 })
        );
    }

    #[test]
    fn test_rejects_decreasing_amount() {
        let result = FineSchedule::new(
            vec![
                FineBand { max_excess: 10, amount: 100 },
                FineBand { max_excess: 20, amount: 50 },
            ],
            500,
        );
        assert_eq!(
            result,
            Err(ScheduleError::DecreasingAmount { prev: 100, next: 50 })
        );

        // Top amount below the last band is also a decrease
        let result = FineSchedule::new(vec![FineBand { max_excess: 10, amount: 100 }], 50);
        assert_eq!(
            result,
            Err(ScheduleError::DecreasingAmount { prev: 100, next: 50 })
        );
    }

    #[test]
    fn test_schedule_spec_builds_from_json() {
        let spec: FineScheduleSpec = serde_json::from_str(
            r#"{ "bands": [ { "maxExcess": 15, "amount": 75 } ], "topAmount": 300 }"#,
        )
        .unwrap();
        let schedule = spec.build().unwrap();
        assert_eq!(schedule.amount(15), 75);
        assert_eq!(schedule.amount(16), 300);
    }
}
