//! Calendar-month window.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};

/// One full calendar month: `start` is the 1st, `end` the last day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MonthWindow {
    /// The window covering `year`-`month`.
    pub fn for_month(year: i32, month: u32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            PipelineError::InvalidArgument(format!("no such month: {year}-{month:02}"))
        })?;
        let end = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))
            .ok_or_else(|| {
                PipelineError::InvalidArgument(format!("no such month: {year}-{month:02}"))
            })?;
        Ok(Self { start, end })
    }

    /// The window containing `date`.
    pub fn containing(date: NaiveDate) -> Result<Self> {
        Self::for_month(date.year(), date.month())
    }

    /// `{start}_{end}` label used in storage keys.
    pub fn label(&self) -> String {
        format!("{}_{}", self.start, self.end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl std::fmt::Display for MonthWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Number of days in `year`-`month`, leap-year exact.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
