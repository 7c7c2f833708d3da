//! Date helpers shared by the evaluator, the ledger and the sweep.
//!
//! Weeks start on Sunday and weekdays are numbered `0..=6` with 0 = Sunday,
//! which is also the wire format for recurrence day sets.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

/// Unit of accountability for a recurrence rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodScope {
    Day,
    Week,
}

/// A concrete day or Sunday-start week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    pub scope: PeriodScope,
    pub start: NaiveDate,
}

impl Period {
    pub fn containing(date: NaiveDate, scope: PeriodScope) -> Self {
        let start = match scope {
            PeriodScope::Day => date,
            PeriodScope::Week => start_of_week(date),
        };
        Self { scope, start }
    }

    /// Last calendar day of the period (inclusive).
    pub fn end(&self) -> NaiveDate {
        match self.scope {
            PeriodScope::Day => self.start,
            PeriodScope::Week => end_of_week(self.start),
        }
    }

    pub fn previous(&self) -> Self {
        let step = match self.scope {
            PeriodScope::Day => 1,
            PeriodScope::Week => 7,
        };
        Self {
            scope: self.scope,
            start: self
                .start
                .checked_sub_days(Days::new(step))
                .unwrap_or(NaiveDate::MIN),
        }
    }

    pub fn key(&self) -> String {
        format_period_key(self.start, self.scope)
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end();
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn is_within(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    start <= date && date <= end
}

pub fn add_days(date: NaiveDate, n: i64) -> EngineResult<NaiveDate> {
    let shifted = if n >= 0 {
        date.checked_add_days(Days::new(n as u64))
    } else {
        date.checked_sub_days(Days::new(n.unsigned_abs()))
    };
    shifted.ok_or_else(|| EngineError::InvalidDate(format!("{} {:+} days is out of range", date, n)))
}

pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(day_of_week(date) as u64))
        .unwrap_or(NaiveDate::MIN)
}

pub fn end_of_week(date: NaiveDate) -> NaiveDate {
    start_of_week(date)
        .checked_add_days(Days::new(6))
        .unwrap_or(NaiveDate::MAX)
}

/// `YYYY-MM-DD` for days, ISO week id `YYYY-Www` for weeks.
///
/// A Sunday-start week is named after the ISO week of its Monday so that
/// every day of the week maps to the same key.
pub fn format_period_key(date: NaiveDate, scope: PeriodScope) -> String {
    match scope {
        PeriodScope::Day => date.format("%Y-%m-%d").to_string(),
        PeriodScope::Week => {
            let monday = start_of_week(date).succ_opt().unwrap_or(date);
            let iso = monday.iso_week();
            format!("{}-W{:02}", iso.year(), iso.week())
        }
    }
}

pub fn weekday_from_index(index: u8) -> EngineResult<Weekday> {
    match index {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        other => Err(EngineError::InvalidDate(format!(
            "weekday {} is invalid; must be 0-6 (Sun-Sat)",
            other
        ))),
    }
}
