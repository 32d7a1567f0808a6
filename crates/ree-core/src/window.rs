//! Trailing calendar-month windows.

use chrono::{Datelike, NaiveDate};

use crate::domain::window::days_in_month;
use crate::domain::{MonthWindow, PipelineError, Result};

/// `months` consecutive calendar-month windows, oldest first, the last one
/// ending on the final day of the month before `as_of`'s month.
pub fn month_windows(as_of: NaiveDate, months: u32) -> Result<Vec<MonthWindow>> {
    if months == 0 {
        return Err(PipelineError::InvalidArgument(
            "months must be > 0".to_string(),
        ));
    }
    let anchor = first_of_month(as_of);
    (1..=months)
        .rev()
        .map(|back| {
            let back = i32::try_from(back).map_err(|_| {
                PipelineError::InvalidArgument(format!("months out of range: {months}"))
            })?;
            let start = shift_months(anchor, -back)?;
            MonthWindow::containing(start)
        })
        .collect()
}

/// The trailing span covered by [`month_windows`]: `(first start, last end)`.
pub fn rolling_span(as_of: NaiveDate, months: u32) -> Result<(NaiveDate, NaiveDate)> {
    let windows = month_windows(as_of, months)?;
    match (windows.first(), windows.last()) {
        (Some(first), Some(last)) => Ok((first.start, last.end)),
        _ => Err(PipelineError::InvalidArgument(
            "months must be > 0".to_string(),
        )),
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Shift `date` by `delta` calendar months, clamping the day to the target
/// month's length (Jan 31 - 1 month = Dec 31, Mar 31 - 1 month = Feb 28/29).
pub fn shift_months(date: NaiveDate, delta: i32) -> Result<NaiveDate> {
    let total = (date.year() * 12 + date.month0() as i32)
        .checked_add(delta)
        .ok_or_else(|| {
            PipelineError::InvalidArgument(format!("cannot shift {date} by {delta} months"))
        })?;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        PipelineError::InvalidArgument(format!("date out of range shifting {date} by {delta}"))
    })
}
