//! Recurring monthly trigger.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::window::days_in_month;
use crate::domain::{PipelineError, Result};
use crate::window::shift_months;

/// Fire once a month at `day` `hour:minute` UTC. Days past the end of a
/// month fire on its last day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlySchedule {
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl Default for MonthlySchedule {
    fn default() -> Self {
        Self {
            day: 1,
            hour: 3,
            minute: 5,
        }
    }
}

impl MonthlySchedule {
    pub fn new(day: u32, hour: u32, minute: u32) -> Result<Self> {
        if !(1..=31).contains(&day) || hour > 23 || minute > 59 {
            return Err(PipelineError::InvalidArgument(format!(
                "invalid schedule: day {day} {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { day, hour, minute })
    }

    /// The first fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let this_month = self.fire_in(now.year(), now.month())?;
        if this_month > now {
            return Ok(this_month);
        }
        let next = shift_months(now.date_naive().with_day(1).unwrap_or(now.date_naive()), 1)?;
        self.fire_in(next.year(), next.month())
    }

    fn fire_in(&self, year: i32, month: u32) -> Result<DateTime<Utc>> {
        let day = self.day.min(days_in_month(year, month));
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(self.hour, self.minute, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| {
                PipelineError::InvalidArgument(format!(
                    "no fire time for {year}-{month:02} with {self:?}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_default_is_first_at_0305() {
        let s = MonthlySchedule::default();
        assert_eq!(s.next_after(at(2026, 1, 15, 0, 0)).unwrap(), at(2026, 2, 1, 3, 5));
        assert_eq!(s.next_after(at(2026, 2, 1, 3, 4)).unwrap(), at(2026, 2, 1, 3, 5));
        assert_eq!(s.next_after(at(2026, 2, 1, 3, 5)).unwrap(), at(2026, 3, 1, 3, 5));
        assert_eq!(s.next_after(at(2026, 12, 2, 0, 0)).unwrap(), at(2027, 1, 1, 3, 5));
    }

    #[test]
    fn test_day_clamps_to_month_end() {
        let s = MonthlySchedule::new(31, 0, 0).unwrap();
        assert_eq!(s.next_after(at(2024, 1, 31, 1, 0)).unwrap(), at(2024, 2, 29, 0, 0));
        assert_eq!(s.next_after(at(2025, 4, 1, 0, 0)).unwrap(), at(2025, 4, 30, 0, 0));
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(MonthlySchedule::new(0, 3, 5).is_err());
        assert!(MonthlySchedule::new(1, 24, 0).is_err());
        assert!(MonthlySchedule::new(1, 0, 60).is_err());
    }
}
