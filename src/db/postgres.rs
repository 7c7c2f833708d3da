use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::recurrence::{Recurrence, RecurrenceKind, RecurrenceParts};
use crate::engine::store::{CheckinStore, GoalStore, MissMarkerStore};
use crate::models::checkin::Checkin;
use crate::models::goal::Goal;
use crate::models::miss_marker::{MarkerStatus, MissMarker};

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::StorageUnavailable(e.to_string())
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct GoalRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    description: Option<String>,
    recurrence_kind: String,
    recurrence_days: Vec<i16>,
    repeat_count: Option<i16>,
    any_days: bool,
    checkins_per_day: i32,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    reset_time: Option<NaiveTime>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<GoalRow> for Goal {
    type Error = EngineError;

    fn try_from(row: GoalRow) -> EngineResult<Self> {
        let days = row
            .recurrence_days
            .iter()
            .map(|d| u8::try_from(*d))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| {
                EngineError::InvalidRecurrenceRule(format!(
                    "goal {} has out-of-range weekday",
                    row.id
                ))
            })?;
        let count = row
            .repeat_count
            .map(u8::try_from)
            .transpose()
            .map_err(|_| {
                EngineError::InvalidRecurrenceRule(format!("goal {} has bad repeat_count", row.id))
            })?;
        let recurrence = Recurrence::try_from(RecurrenceParts {
            kind: Some(RecurrenceKind::parse(&row.recurrence_kind)?),
            days,
            count,
            any_days: row.any_days,
        })?;
        let checkins_per_day = u32::try_from(row.checkins_per_day).map_err(|_| {
            EngineError::InvalidCheckinCount(format!("goal {} has negative checkins_per_day", row.id))
        })?;

        Ok(Goal {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            description: row.description,
            recurrence,
            checkins_per_day,
            start_date: row.start_date,
            end_date: row.end_date,
            reset_time: row.reset_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CheckinRow {
    goal_id: Uuid,
    checkin_date: NaiveDate,
    count: i32,
    updated_at: DateTime<Utc>,
}

impl From<CheckinRow> for Checkin {
    fn from(row: CheckinRow) -> Self {
        Checkin {
            goal_id: row.goal_id,
            checkin_date: row.checkin_date,
            count: row.count.max(0) as u32,
            updated_at: row.updated_at,
        }
    }
}

fn convert_rows(rows: Vec<GoalRow>) -> Vec<EngineResult<Goal>> {
    rows.into_iter().map(Goal::try_from).collect()
}

/// Valid goals only; unreadable rows are logged and left out.
fn readable_goals(rows: Vec<GoalRow>) -> Vec<Goal> {
    convert_rows(rows)
        .into_iter()
        .filter_map(|goal| match goal {
            Ok(goal) => Some(goal),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable goal row");
                None
            }
        })
        .collect()
}

fn days_column(parts: &RecurrenceParts) -> Vec<i16> {
    parts.days.iter().map(|d| *d as i16).collect()
}

const GOAL_COLUMNS: &str = r#"
    id, user_id, title, description, recurrence_kind, recurrence_days,
    repeat_count, any_days, checkins_per_day, start_date, end_date,
    reset_time, created_at, updated_at
"#;

#[async_trait]
impl GoalStore for PgStore {
    async fn ping(&self) -> EngineResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_goals(&self) -> EngineResult<Vec<EngineResult<Goal>>> {
        let rows = sqlx::query_as::<_, GoalRow>(&format!(
            "SELECT {} FROM goals ORDER BY created_at ASC, id ASC",
            GOAL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(convert_rows(rows))
    }

    async fn list_goals_for_user(&self, user_id: Uuid) -> EngineResult<Vec<Goal>> {
        let rows = sqlx::query_as::<_, GoalRow>(&format!(
            "SELECT {} FROM goals WHERE user_id = $1 ORDER BY created_at ASC, id ASC",
            GOAL_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(readable_goals(rows))
    }

    async fn get_goal(&self, user_id: Uuid, goal_id: Uuid) -> EngineResult<Option<Goal>> {
        let row = sqlx::query_as::<_, GoalRow>(&format!(
            "SELECT {} FROM goals WHERE id = $1 AND user_id = $2",
            GOAL_COLUMNS
        ))
        .bind(goal_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Goal::try_from).transpose()
    }

    async fn insert_goal(&self, goal: &Goal) -> EngineResult<()> {
        let parts = goal.recurrence.to_parts();
        sqlx::query(
            r#"
            INSERT INTO goals (id, user_id, title, description, recurrence_kind, recurrence_days,
                               repeat_count, any_days, checkins_per_day, start_date, end_date,
                               reset_time, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(goal.id)
        .bind(goal.user_id)
        .bind(&goal.title)
        .bind(&goal.description)
        .bind(goal.recurrence.kind().as_str())
        .bind(days_column(&parts))
        .bind(parts.count.map(i16::from))
        .bind(parts.any_days)
        .bind(goal.checkins_per_day as i32)
        .bind(goal.start_date)
        .bind(goal.end_date)
        .bind(goal.reset_time)
        .bind(goal.created_at)
        .bind(goal.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_goal(&self, goal: &Goal) -> EngineResult<()> {
        let parts = goal.recurrence.to_parts();
        let result = sqlx::query(
            r#"
            UPDATE goals SET
                title = $3,
                description = $4,
                recurrence_kind = $5,
                recurrence_days = $6,
                repeat_count = $7,
                any_days = $8,
                checkins_per_day = $9,
                start_date = $10,
                end_date = $11,
                reset_time = $12,
                updated_at = $13
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(goal.id)
        .bind(goal.user_id)
        .bind(&goal.title)
        .bind(&goal.description)
        .bind(goal.recurrence.kind().as_str())
        .bind(days_column(&parts))
        .bind(parts.count.map(i16::from))
        .bind(parts.any_days)
        .bind(goal.checkins_per_day as i32)
        .bind(goal.start_date)
        .bind(goal.end_date)
        .bind(goal.reset_time)
        .bind(goal.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::StorageUnavailable(format!(
                "goal {} does not exist",
                goal.id
            )));
        }
        Ok(())
    }

    async fn delete_goal(&self, user_id: Uuid, goal_id: Uuid) -> EngineResult<bool> {
        // Check-ins and markers go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM goals WHERE id = $1 AND user_id = $2")
            .bind(goal_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CheckinStore for PgStore {
    async fn list_checkins(
        &self,
        goal_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Vec<Checkin>> {
        let rows = sqlx::query_as::<_, CheckinRow>(
            r#"
            SELECT goal_id, checkin_date, count, updated_at FROM goal_checkins
            WHERE goal_id = $1 AND checkin_date >= $2 AND checkin_date <= $3
            ORDER BY checkin_date ASC
            "#,
        )
        .bind(goal_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Checkin::from).collect())
    }

    async fn upsert_checkin(&self, goal_id: Uuid, date: NaiveDate, count: u32) -> EngineResult<Checkin> {
        let row = sqlx::query_as::<_, CheckinRow>(
            r#"
            INSERT INTO goal_checkins (goal_id, checkin_date, count, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (goal_id, checkin_date)
            DO UPDATE SET count = EXCLUDED.count, updated_at = NOW()
            RETURNING goal_id, checkin_date, count, updated_at
            "#,
        )
        .bind(goal_id)
        .bind(date)
        .bind(count as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}

#[derive(Debug, FromRow)]
struct MarkerRow {
    status: String,
    created_at: DateTime<Utc>,
    claimed_at: DateTime<Utc>,
}

fn marker_status(raw: &str) -> EngineResult<MarkerStatus> {
    match raw {
        "pending" => Ok(MarkerStatus::Pending),
        "sent" => Ok(MarkerStatus::Sent),
        other => Err(EngineError::StorageUnavailable(format!(
            "unknown miss marker status '{other}'"
        ))),
    }
}

#[async_trait]
impl MissMarkerStore for PgStore {
    async fn has_marker(&self, goal_id: Uuid, period_key: &str) -> EngineResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM goal_miss_markers
                WHERE goal_id = $1 AND period_key = $2 AND status = 'sent'
            )
            "#,
        )
        .bind(goal_id)
        .bind(period_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn claim_marker(
        &self,
        goal_id: Uuid,
        period_key: &str,
        stale_before: DateTime<Utc>,
    ) -> EngineResult<MissMarker> {
        // The conditional update only fires for an abandoned pending claim;
        // any other conflict returns no row.
        let row = sqlx::query_as::<_, MarkerRow>(
            r#"
            INSERT INTO goal_miss_markers (goal_id, period_key, status, claimed_at)
            VALUES ($1, $2, 'pending', NOW())
            ON CONFLICT (goal_id, period_key) DO UPDATE SET claimed_at = NOW()
                WHERE goal_miss_markers.status = 'pending'
                  AND goal_miss_markers.claimed_at < $3
            RETURNING status, created_at, claimed_at
            "#,
        )
        .bind(goal_id)
        .bind(period_key)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::DuplicateMiss {
            goal_id,
            period_key: period_key.to_string(),
        })?;

        Ok(MissMarker {
            goal_id,
            period_key: period_key.to_string(),
            status: marker_status(&row.status)?,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
        })
    }

    async fn confirm_marker(&self, goal_id: Uuid, period_key: &str) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE goal_miss_markers SET status = 'sent' WHERE goal_id = $1 AND period_key = $2",
        )
        .bind(goal_id)
        .bind(period_key)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::StorageUnavailable(format!(
                "no claim for goal {goal_id} period {period_key}"
            )));
        }
        Ok(())
    }

    async fn release_marker(&self, goal_id: Uuid, period_key: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            DELETE FROM goal_miss_markers
            WHERE goal_id = $1 AND period_key = $2 AND status = 'pending'
            "#,
        )
        .bind(goal_id)
        .bind(period_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_markers(&self, cutoff: DateTime<Utc>) -> EngineResult<u64> {
        let result = sqlx::query("DELETE FROM goal_miss_markers WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str, days: Vec<i16>, count: Option<i16>, any_days: bool) -> GoalRow {
        let now = Utc::now();
        GoalRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Stretch".into(),
            description: None,
            recurrence_kind: kind.into(),
            recurrence_days: days,
            repeat_count: count,
            any_days,
            checkins_per_day: 1,
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            end_date: None,
            reset_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_goal_row_converts_x_per_week() {
        let goal = Goal::try_from(row("x_per_week", vec![2, 4], Some(2), false)).unwrap();
        match goal.recurrence {
            Recurrence::XPerWeek { count, any_days, days } => {
                assert_eq!(count, 2);
                assert!(!any_days);
                assert_eq!(days.indices(), vec![2, 4]);
            }
            other => panic!("unexpected recurrence {:?}", other),
        }
    }

    #[test]
    fn test_goal_row_rejects_corrupt_rule() {
        assert!(Goal::try_from(row("custom_days", vec![], None, false)).is_err());
        assert!(Goal::try_from(row("custom_days", vec![9], None, false)).is_err());
        assert!(Goal::try_from(row("monthly", vec![], None, false)).is_err());
    }

    #[test]
    fn test_bad_row_is_reported_in_place() {
        let rows = vec![
            row("daily", vec![], None, false),
            row("custom_days", vec![], None, false),
            row("weekly", vec![], None, false),
        ];
        let converted = convert_rows(rows);
        assert_eq!(converted.len(), 3);
        assert!(converted[0].is_ok());
        assert!(converted[1].is_err());
        assert!(converted[2].is_ok());
    }

    #[test]
    fn test_readable_goals_skips_bad_rows() {
        let rows = vec![
            row("x_per_week", vec![1, 2], Some(3), false),
            row("daily", vec![], None, false),
        ];
        let goals = readable_goals(rows);
        assert_eq!(goals.len(), 1);
        assert!(matches!(goals[0].recurrence, Recurrence::Daily));
    }

    #[test]
    fn test_marker_status_parsing() {
        assert_eq!(marker_status("pending").unwrap(), MarkerStatus::Pending);
        assert_eq!(marker_status("sent").unwrap(), MarkerStatus::Sent);
        assert!(marker_status("lost").is_err());
    }

    #[test]
    fn test_days_column_matches_recurrence_parts() {
        let goal = Goal::try_from(row("custom_days", vec![5, 1, 3], None, false)).unwrap();
        assert_eq!(days_column(&goal.recurrence.to_parts()), vec![1, 3, 5]);
    }
}
