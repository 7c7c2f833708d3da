//! Storage seams consumed by the engine and the HTTP layer.
//!
//! Implemented by [`crate::db::postgres::PgStore`] and
//! [`crate::db::memory::MemoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::error::EngineResult;
use crate::models::checkin::Checkin;
use crate::models::goal::Goal;
use crate::models::miss_marker::MissMarker;

#[async_trait]
pub trait GoalStore: Send + Sync {
    /// Readiness check.
    async fn ping(&self) -> EngineResult<()> {
        Ok(())
    }

    /// Every goal, one entry per stored row. A row that cannot be turned into
    /// a valid goal is reported in place instead of failing the whole list.
    async fn list_goals(&self) -> EngineResult<Vec<EngineResult<Goal>>>;

    async fn list_goals_for_user(&self, user_id: Uuid) -> EngineResult<Vec<Goal>>;

    async fn get_goal(&self, user_id: Uuid, goal_id: Uuid) -> EngineResult<Option<Goal>>;

    async fn insert_goal(&self, goal: &Goal) -> EngineResult<()>;

    async fn update_goal(&self, goal: &Goal) -> EngineResult<()>;

    /// Removes the goal with its check-ins and miss markers.
    /// Returns false if no such goal belonged to the user.
    async fn delete_goal(&self, user_id: Uuid, goal_id: Uuid) -> EngineResult<bool>;
}

#[async_trait]
pub trait CheckinStore: Send + Sync {
    async fn list_checkins(
        &self,
        goal_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Vec<Checkin>>;

    /// Atomic upsert keyed by (goal_id, date); last write wins.
    async fn upsert_checkin(&self, goal_id: Uuid, date: NaiveDate, count: u32) -> EngineResult<Checkin>;
}

#[async_trait]
pub trait MissMarkerStore: Send + Sync {
    /// True once a penalty for the period has been confirmed as sent.
    async fn has_marker(&self, goal_id: Uuid, period_key: &str) -> EngineResult<bool>;

    /// Atomically takes ownership of a period before its penalty is sent.
    ///
    /// Inserts a pending marker, or re-takes a pending one whose claim is
    /// older than `stale_before`. Fails with `EngineError::DuplicateMiss` when
    /// the period is sent or held by a live claim.
    async fn claim_marker(
        &self,
        goal_id: Uuid,
        period_key: &str,
        stale_before: DateTime<Utc>,
    ) -> EngineResult<MissMarker>;

    /// Marks a claimed period as sent.
    async fn confirm_marker(&self, goal_id: Uuid, period_key: &str) -> EngineResult<()>;

    /// Drops a pending claim so the period can be retried.
    async fn release_marker(&self, goal_id: Uuid, period_key: &str) -> EngineResult<()>;

    /// Deletes markers created before `cutoff`; returns how many were removed.
    async fn prune_markers(&self, cutoff: DateTime<Utc>) -> EngineResult<u64>;
}
