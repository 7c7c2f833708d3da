use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use uuid::Uuid;

use super::calendar::{Period, PeriodScope};
use super::error::{EngineError, EngineResult};
use crate::models::checkin::Checkin;
use crate::models::goal::Goal;

/// Per-goal, per-day check-in counters.
#[derive(Debug, Clone, Default)]
pub struct CheckinLedger {
    counts: HashMap<Uuid, BTreeMap<NaiveDate, u32>>,
}

impl CheckinLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Checkin>,
    {
        let mut ledger = Self::new();
        for record in records {
            ledger
                .counts
                .entry(record.goal_id)
                .or_default()
                .insert(record.checkin_date, record.count);
        }
        ledger
    }

    /// Overwrites the day's count. Out-of-range input is rejected, never clamped.
    pub fn set_count(&mut self, goal: &Goal, date: NaiveDate, count: i64) -> EngineResult<u32> {
        let count = validate_count(goal, count)?;
        self.counts.entry(goal.id).or_default().insert(date, count);
        Ok(count)
    }

    pub fn get_count(&self, goal_id: Uuid, date: NaiveDate) -> u32 {
        self.counts
            .get(&goal_id)
            .and_then(|days| days.get(&date))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of daily counts across the Sunday-start week containing `date`.
    pub fn week_total(&self, goal_id: Uuid, date: NaiveDate) -> u32 {
        let week = Period::containing(date, PeriodScope::Week);
        self.counts
            .get(&goal_id)
            .map(|days| days.range(week.start..=week.end()).map(|(_, c)| *c).sum())
            .unwrap_or(0)
    }
}

/// Check a raw count against `[0, checkins_per_day]`.
pub fn validate_count(goal: &Goal, count: i64) -> EngineResult<u32> {
    if count < 0 || count > goal.checkins_per_day as i64 {
        return Err(EngineError::InvalidCheckinCount(format!(
            "count {} is outside 0-{}",
            count, goal.checkins_per_day
        )));
    }
    Ok(count as u32)
}
