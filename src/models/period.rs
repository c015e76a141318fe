//! Year-month partition a sync pass is scoped to.

use crate::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_YEAR: i32 = 2020;
pub const MAX_YEAR: i32 = 2035;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingPeriod {
    pub year: i32,
    pub month: u32,
}

impl BillingPeriod {
    pub fn new(year: i32, month: u32) -> SyncResult<Self> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(SyncError::InvalidParams(format!(
                "year '{year}' is out of the valid range ({MIN_YEAR}-{MAX_YEAR})"
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(SyncError::InvalidParams(format!(
                "month '{month}' is out of the valid range (1-12)"
            )));
        }
        Ok(Self { year, month })
    }

    /// The month before this one, rolling the year over in January.
    ///
    /// Not range-checked: January of the first valid year still has a
    /// predecessor worth scanning.
    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// Source partition directory, e.g. `BILLING_PERIOD=2025-06`.
    pub fn partition(&self) -> String {
        format!("BILLING_PERIOD={}-{:02}", self.year, self.month)
    }

    /// Scan prefix under a payer's export path.
    pub fn source_prefix(&self, path_prefix: &str) -> String {
        let base = path_prefix.trim_end_matches('/');
        if base.is_empty() {
            format!("{}/", self.partition())
        } else {
            format!("{}/{}/", base, self.partition())
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_ranges() {
        assert!(BillingPeriod::new(2025, 6).is_ok());
        assert!(BillingPeriod::new(2019, 6).is_err());
        assert!(BillingPeriod::new(2036, 6).is_err());
        assert!(BillingPeriod::new(2025, 0).is_err());
        assert!(BillingPeriod::new(2025, 13).is_err());
    }

    #[test]
    fn previous_rolls_over_year() {
        let jan = BillingPeriod::new(2025, 1).unwrap();
        assert_eq!(jan.previous(), BillingPeriod { year: 2024, month: 12 });
        let jun = BillingPeriod::new(2025, 6).unwrap();
        assert_eq!(jun.previous(), BillingPeriod { year: 2025, month: 5 });
    }

    #[test]
    fn builds_zero_padded_scan_prefix() {
        let period = BillingPeriod::new(2025, 6).unwrap();
        assert_eq!(
            period.source_prefix("team/export/data/"),
            "team/export/data/BILLING_PERIOD=2025-06/"
        );
        assert_eq!(period.source_prefix(""), "BILLING_PERIOD=2025-06/");
        assert_eq!(period.to_string(), "2025-06");
    }
}
