//! Year-month arithmetic on `YYYYMM` periods.

use std::fmt;
use std::str::FromStr;

use crate::error::{SimError, SimResult};

/// One calendar month, stored as `year * 100 + month`.
///
/// Any parsed period shifted by any `i32` month count stays representable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(i64);

impl Period {
    pub fn new(year: i32, month: u32) -> SimResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(SimError::invalid_config(format!(
                "month {} is outside 1..=12",
                month
            )));
        }
        Ok(Self(year as i64 * 100 + month as i64))
    }

    pub fn from_yyyymm(encoded: i32) -> SimResult<Self> {
        let month = encoded.rem_euclid(100);
        let year = encoded.div_euclid(100);
        Self::new(year, month as u32)
    }

    pub fn yyyymm(&self) -> i64 {
        self.0
    }

    pub fn year(&self) -> i64 {
        self.0.div_euclid(100)
    }

    pub fn month(&self) -> u32 {
        self.0.rem_euclid(100) as u32
    }

    fn month_index(&self) -> i64 {
        self.year() * 12 + (self.month() as i64 - 1)
    }

    fn from_month_index(index: i64) -> Self {
        let year = index.div_euclid(12);
        let month = index.rem_euclid(12) + 1;
        Self(year * 100 + month)
    }

    pub fn next(self) -> Self {
        add_months(self, 1)
    }
}

/// Shifts `period` by `n` months in either direction, carrying across years.
pub fn add_months(period: Period, n: i32) -> Period {
    Period::from_month_index(period.month_index() + n as i64)
}

/// Signed month count from `from` to `to`.
pub fn months_between(from: Period, to: Period) -> i64 {
    to.month_index() - from.month_index()
}

/// True when `current` sits a whole number of rebalance intervals from `anchor`.
pub fn is_rebalance_due(anchor: Period, current: Period, frequency_months: u32) -> SimResult<bool> {
    if frequency_months < 1 {
        return Err(SimError::invalid_config(
            "rebalance frequency must be at least one month",
        ));
    }
    let diff = months_between(anchor, current);
    Ok(diff.rem_euclid(frequency_months as i64) == 0)
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Period({})", self.0)
    }
}

impl FromStr for Period {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 6 {
            return Err(SimError::invalid_config(format!(
                "period '{}' is not in YYYYMM form",
                s
            )));
        }
        let encoded: i32 = s
            .parse()
            .map_err(|_| SimError::invalid_config(format!("period '{}' is not numeric", s)))?;
        Period::from_yyyymm(encoded)
    }
}
