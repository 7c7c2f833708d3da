use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::engine::calendar::PeriodScope;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::progress::ProgressStatus;
use crate::engine::recurrence::{Recurrence, RecurrenceParts};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub recurrence: Recurrence,
    pub checkins_per_day: u32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Deadline for each active day; `None` means end of day.
    pub reset_time: Option<NaiveTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    pub fn scope(&self) -> PeriodScope {
        self.recurrence.scope()
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.checkins_per_day < 1 {
            return Err(EngineError::InvalidCheckinCount(
                "checkins_per_day must be at least 1".into(),
            ));
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(EngineError::InvalidDate(format!(
                    "end_date {} is before start_date {}",
                    end, self.start_date
                )));
            }
        }
        Ok(())
    }

    pub fn from_request(
        user_id: Uuid,
        body: CreateGoalRequest,
        today: NaiveDate,
    ) -> EngineResult<Self> {
        let recurrence = match body.recurrence {
            Some(parts) => Recurrence::try_from(parts)?,
            None => Recurrence::None,
        };
        let now = Utc::now();
        let goal = Self {
            id: Uuid::new_v4(),
            user_id,
            title: body.title,
            description: body.description,
            recurrence,
            checkins_per_day: checkins_per_day_from(body.checkins_per_day.unwrap_or(1))?,
            start_date: body.start_date.unwrap_or(today),
            end_date: body.end_date,
            reset_time: body.reset_time,
            created_at: now,
            updated_at: now,
        };
        goal.validate()?;
        Ok(goal)
    }

    /// Apply a partial edit; the goal is left untouched if the result is invalid.
    pub fn apply_update(&mut self, body: UpdateGoalRequest) -> EngineResult<()> {
        let mut next = self.clone();
        if let Some(title) = body.title {
            next.title = title;
        }
        if let Some(description) = body.description {
            next.description = Some(description);
        }
        if let Some(parts) = body.recurrence {
            next.recurrence = Recurrence::try_from(parts)?;
        }
        if let Some(n) = body.checkins_per_day {
            next.checkins_per_day = checkins_per_day_from(n)?;
        }
        if let Some(start) = body.start_date {
            next.start_date = start;
        }
        if let Some(end) = body.end_date {
            next.end_date = end;
        }
        if let Some(reset) = body.reset_time {
            next.reset_time = reset;
        }
        next.validate()?;
        next.updated_at = Utc::now();
        *self = next;
        Ok(())
    }
}

fn checkins_per_day_from(raw: i32) -> EngineResult<u32> {
    u32::try_from(raw)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| {
            EngineError::InvalidCheckinCount(format!(
                "checkins_per_day must be at least 1, got {}",
                raw
            ))
        })
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGoalRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[validate(length(max = 2000, message = "Description must be under 2000 characters"))]
    pub description: Option<String>,

    /// Omitted means a one-time goal.
    pub recurrence: Option<RecurrenceParts>,

    pub checkins_per_day: Option<i32>,

    /// Default: today (UTC).
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub reset_time: Option<NaiveTime>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateGoalRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    pub recurrence: Option<RecurrenceParts>,
    pub checkins_per_day: Option<i32>,
    pub start_date: Option<NaiveDate>,

    /// Absent leaves the value alone; `null` clears it.
    #[serde(default, deserialize_with = "nullable")]
    pub end_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    pub reset_time: Option<Option<NaiveTime>>,
}

/// Maps a present field (including `null`) to `Some`, so that absence can be
/// told apart from an explicit `null`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
pub struct GoalWithProgress {
    #[serde(flatten)]
    pub goal: Goal,
    pub progress: ProgressStatus,
    /// Sum of check-in counts in the current Sunday-start week.
    pub week_total: u32,
}

#[cfg(test)]
pub fn test_goal(recurrence: Recurrence, start_date: NaiveDate, end_date: Option<NaiveDate>) -> Goal {
    let now = Utc::now();
    Goal {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        title: "Test goal".into(),
        description: None,
        recurrence,
        checkins_per_day: 1,
        start_date,
        end_date,
        reset_time: None,
        created_at: now,
        updated_at: now,
    }
}
