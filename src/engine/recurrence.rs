use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use super::calendar::{self, Period, PeriodScope};
use super::error::{EngineError, EngineResult};
use crate::models::goal::Goal;

/// Upper bound on the forward scan in [`Evaluator::next_active_date`].
const MAX_SCAN_DAYS: usize = 366;

/// Set of weekdays stored as a bitmask, bit 0 = Sunday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn from_indices(indices: &[u8]) -> EngineResult<Self> {
        let mut bits = 0u8;
        for &i in indices {
            calendar::weekday_from_index(i)?;
            bits |= 1 << i;
        }
        Ok(Self(bits))
    }

    pub fn contains(&self, day: u8) -> bool {
        day < 7 && self.0 & (1 << day) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn indices(&self) -> Vec<u8> {
        (0..7).filter(|d| self.contains(*d)).collect()
    }
}

impl Serialize for WeekdaySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.indices().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WeekdaySet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<u8>::deserialize(deserializer)?;
        WeekdaySet::from_indices(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceKind {
    None,
    Daily,
    Weekly,
    CustomDays,
    XPerWeek,
}

impl RecurrenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceKind::None => "none",
            RecurrenceKind::Daily => "daily",
            RecurrenceKind::Weekly => "weekly",
            RecurrenceKind::CustomDays => "custom_days",
            RecurrenceKind::XPerWeek => "x_per_week",
        }
    }

    pub fn parse(raw: &str) -> EngineResult<Self> {
        match raw {
            "none" => Ok(RecurrenceKind::None),
            "daily" => Ok(RecurrenceKind::Daily),
            "weekly" => Ok(RecurrenceKind::Weekly),
            "custom_days" => Ok(RecurrenceKind::CustomDays),
            "x_per_week" => Ok(RecurrenceKind::XPerWeek),
            other => Err(EngineError::InvalidRecurrenceRule(format!(
                "unknown recurrence kind '{}'",
                other
            ))),
        }
    }
}

/// Loose, field-per-column shape of a recurrence rule as it arrives over the
/// wire or out of the `goals` table. Converted into [`Recurrence`] with
/// validation; never used for evaluation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecurrenceParts {
    pub kind: Option<RecurrenceKind>,
    #[serde(default)]
    pub days: Vec<u8>,
    pub count: Option<u8>,
    #[serde(default)]
    pub any_days: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", try_from = "RecurrenceParts")]
pub enum Recurrence {
    None,
    Daily,
    Weekly,
    CustomDays {
        days: WeekdaySet,
    },
    XPerWeek {
        count: u8,
        any_days: bool,
        days: WeekdaySet,
    },
}

impl TryFrom<RecurrenceParts> for Recurrence {
    type Error = EngineError;

    fn try_from(parts: RecurrenceParts) -> EngineResult<Self> {
        let kind = parts.kind.ok_or_else(|| {
            EngineError::InvalidRecurrenceRule("recurrence kind is required".into())
        })?;
        let days = WeekdaySet::from_indices(&parts.days)
            .map_err(|e| EngineError::InvalidRecurrenceRule(e.to_string()))?;

        match kind {
            RecurrenceKind::None => Ok(Recurrence::None),
            RecurrenceKind::Daily => Ok(Recurrence::Daily),
            RecurrenceKind::Weekly => Ok(Recurrence::Weekly),
            RecurrenceKind::CustomDays => {
                if days.is_empty() {
                    return Err(EngineError::InvalidRecurrenceRule(
                        "custom_days requires at least one day".into(),
                    ));
                }
                Ok(Recurrence::CustomDays { days })
            }
            RecurrenceKind::XPerWeek => {
                let count = parts.count.ok_or_else(|| {
                    EngineError::InvalidRecurrenceRule("x_per_week requires count".into())
                })?;
                if !(1..=7).contains(&count) {
                    return Err(EngineError::InvalidRecurrenceRule(
                        "x_per_week count must be 1-7".into(),
                    ));
                }
                if parts.any_days {
                    return Ok(Recurrence::XPerWeek {
                        count,
                        any_days: true,
                        days: WeekdaySet::default(),
                    });
                }
                if days.len() != count as usize {
                    return Err(EngineError::InvalidRecurrenceRule(format!(
                        "x_per_week with fixed days needs exactly {} days, got {}",
                        count,
                        days.len()
                    )));
                }
                Ok(Recurrence::XPerWeek {
                    count,
                    any_days: false,
                    days,
                })
            }
        }
    }
}

impl Recurrence {
    pub fn kind(&self) -> RecurrenceKind {
        match self {
            Recurrence::None => RecurrenceKind::None,
            Recurrence::Daily => RecurrenceKind::Daily,
            Recurrence::Weekly => RecurrenceKind::Weekly,
            Recurrence::CustomDays { .. } => RecurrenceKind::CustomDays,
            Recurrence::XPerWeek { .. } => RecurrenceKind::XPerWeek,
        }
    }

    pub fn scope(&self) -> PeriodScope {
        match self {
            Recurrence::XPerWeek { .. } => PeriodScope::Week,
            _ => PeriodScope::Day,
        }
    }

    /// Flatten back into storage columns.
    pub fn to_parts(&self) -> RecurrenceParts {
        let (days, count, any_days) = match self {
            Recurrence::CustomDays { days } => (days.indices(), None, false),
            Recurrence::XPerWeek {
                count,
                any_days,
                days,
            } => (days.indices(), Some(*count), *any_days),
            _ => (Vec::new(), None, false),
        };
        RecurrenceParts {
            kind: Some(self.kind()),
            days,
            count,
            any_days,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrencePolicy {
    /// Lifetime of a goal without an explicit end date.
    pub default_horizon_months: u32,
}

impl Default for RecurrencePolicy {
    fn default() -> Self {
        Self {
            default_horizon_months: 12,
        }
    }
}

/// Decides on which dates a goal is active.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    policy: RecurrencePolicy,
}

impl Evaluator {
    pub fn new(policy: RecurrencePolicy) -> Self {
        Self { policy }
    }

    pub fn effective_end_date(&self, goal: &Goal) -> NaiveDate {
        goal.end_date.unwrap_or_else(|| {
            goal.start_date
                .checked_add_months(Months::new(self.policy.default_horizon_months))
                .unwrap_or(NaiveDate::MAX)
        })
    }

    pub fn is_active_on(&self, goal: &Goal, date: NaiveDate) -> bool {
        if !calendar::is_within(date, goal.start_date, self.effective_end_date(goal)) {
            return false;
        }
        let dow = calendar::day_of_week(date);
        match &goal.recurrence {
            Recurrence::None => date == goal.start_date,
            Recurrence::Daily => true,
            Recurrence::Weekly => dow == calendar::day_of_week(goal.start_date),
            Recurrence::CustomDays { days } => days.contains(dow),
            Recurrence::XPerWeek { any_days, days, .. } => *any_days || days.contains(dow),
        }
    }

    /// First active date strictly after `after`, if any before the goal ends.
    pub fn next_active_date(&self, goal: &Goal, after: NaiveDate) -> Option<NaiveDate> {
        let end = self.effective_end_date(goal);
        let first = after.succ_opt()?.max(goal.start_date);
        first
            .iter_days()
            .take(MAX_SCAN_DAYS)
            .take_while(|d| *d <= end)
            .find(|d| self.is_active_on(goal, *d))
    }

    pub fn active_days_in(&self, goal: &Goal, period: &Period) -> u32 {
        period.days().filter(|d| self.is_active_on(goal, *d)).count() as u32
    }
}
