//! Date values
//!
//! Enrollment dates travel as `Y/M/D` strings and schedule dates as
//! `YYYY-MM-DD`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Months either side of an intake month still counted as the same intake
const INTAKE_MONTH_TOLERANCE: u32 = 2;

/// Enrollment date of a class or student
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EnrolDate {
    pub year: u32,
    pub month: u32,
    pub day: u32,
}

impl EnrolDate {
    pub fn new(year: u32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    /// Placeholder used when a request carries no usable enrollment date
    pub fn unknown() -> Self {
        Self::new(0, 1, 1)
    }

    /// Whether this date belongs to the intake of `year`/`month`
    pub fn same_intake(&self, year: u32, month: u32) -> bool {
        self.year == year && self.month.abs_diff(month) <= INTAKE_MONTH_TOLERANCE
    }
}

impl FromStr for EnrolDate {
    type Err = DomainError;

    /// Parse `Y/M/D`. Parts that are not numbers read as zero; fewer than
    /// three parts is an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DomainError::InvalidEnrolDate(s.to_string()));
        }
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() < 3 {
            return Err(DomainError::InvalidEnrolDate(s.to_string()));
        }
        let num = |p: &str| p.trim().parse::<u32>().unwrap_or(0);
        Ok(Self::new(num(parts[0]), num(parts[1]), num(parts[2])))
    }
}

impl fmt::Display for EnrolDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.year, self.month, self.day)
    }
}

/// Parse a schedule date in `YYYY-MM-DD` form
pub fn parse_schedule_date(s: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| DomainError::InvalidScheduleDate(s.to_string()))
}
