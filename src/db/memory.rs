use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::store::{CheckinStore, GoalStore, MissMarkerStore};
use crate::models::checkin::Checkin;
use crate::models::goal::Goal;
use crate::models::miss_marker::{MarkerStatus, MissMarker};

/// In-process store for single-instance runs and tests.
/// Contents are lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

#[derive(Default)]
struct Tables {
    goals: HashMap<Uuid, Goal>,
    checkins: HashMap<Uuid, BTreeMap<NaiveDate, Checkin>>,
    markers: HashMap<(Uuid, String), MissMarker>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GoalStore for MemoryStore {
    async fn list_goals(&self) -> EngineResult<Vec<EngineResult<Goal>>> {
        let tables = self.inner.lock().await;
        let mut goals: Vec<Goal> = tables.goals.values().cloned().collect();
        goals.sort_by_key(|g| (g.created_at, g.id));
        Ok(goals.into_iter().map(Ok).collect())
    }

    async fn list_goals_for_user(&self, user_id: Uuid) -> EngineResult<Vec<Goal>> {
        let tables = self.inner.lock().await;
        let mut goals: Vec<Goal> = tables
            .goals
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect();
        goals.sort_by_key(|g| (g.created_at, g.id));
        Ok(goals)
    }

    async fn get_goal(&self, user_id: Uuid, goal_id: Uuid) -> EngineResult<Option<Goal>> {
        let tables = self.inner.lock().await;
        Ok(tables
            .goals
            .get(&goal_id)
            .filter(|g| g.user_id == user_id)
            .cloned())
    }

    async fn insert_goal(&self, goal: &Goal) -> EngineResult<()> {
        let mut tables = self.inner.lock().await;
        tables.goals.insert(goal.id, goal.clone());
        Ok(())
    }

    async fn update_goal(&self, goal: &Goal) -> EngineResult<()> {
        let mut tables = self.inner.lock().await;
        match tables.goals.get_mut(&goal.id) {
            Some(existing) if existing.user_id == goal.user_id => {
                *existing = goal.clone();
                Ok(())
            }
            _ => Err(EngineError::StorageUnavailable(format!(
                "goal {} does not exist",
                goal.id
            ))),
        }
    }

    async fn delete_goal(&self, user_id: Uuid, goal_id: Uuid) -> EngineResult<bool> {
        let mut tables = self.inner.lock().await;
        let owned = tables
            .goals
            .get(&goal_id)
            .map(|g| g.user_id == user_id)
            .unwrap_or(false);
        if !owned {
            return Ok(false);
        }
        tables.goals.remove(&goal_id);
        tables.checkins.remove(&goal_id);
        tables.markers.retain(|(id, _), _| *id != goal_id);
        Ok(true)
    }
}

#[async_trait]
impl CheckinStore for MemoryStore {
    async fn list_checkins(
        &self,
        goal_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Vec<Checkin>> {
        if end < start {
            return Ok(Vec::new());
        }
        let tables = self.inner.lock().await;
        Ok(tables
            .checkins
            .get(&goal_id)
            .map(|days| days.range(start..=end).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn upsert_checkin(&self, goal_id: Uuid, date: NaiveDate, count: u32) -> EngineResult<Checkin> {
        let mut tables = self.inner.lock().await;
        let checkin = Checkin {
            goal_id,
            checkin_date: date,
            count,
            updated_at: Utc::now(),
        };
        tables
            .checkins
            .entry(goal_id)
            .or_default()
            .insert(date, checkin.clone());
        Ok(checkin)
    }
}

#[async_trait]
impl MissMarkerStore for MemoryStore {
    async fn has_marker(&self, goal_id: Uuid, period_key: &str) -> EngineResult<bool> {
        let tables = self.inner.lock().await;
        Ok(tables
            .markers
            .get(&(goal_id, period_key.to_string()))
            .is_some_and(|m| m.status == MarkerStatus::Sent))
    }

    async fn claim_marker(
        &self,
        goal_id: Uuid,
        period_key: &str,
        stale_before: DateTime<Utc>,
    ) -> EngineResult<MissMarker> {
        let mut tables = self.inner.lock().await;
        let now = Utc::now();
        let key = (goal_id, period_key.to_string());
        match tables.markers.get_mut(&key) {
            Some(existing)
                if existing.status == MarkerStatus::Pending
                    && existing.claimed_at < stale_before =>
            {
                existing.claimed_at = now;
                Ok(existing.clone())
            }
            Some(_) => Err(EngineError::DuplicateMiss {
                goal_id,
                period_key: period_key.to_string(),
            }),
            None => {
                let marker = MissMarker {
                    goal_id,
                    period_key: period_key.to_string(),
                    status: MarkerStatus::Pending,
                    created_at: now,
                    claimed_at: now,
                };
                tables.markers.insert(key, marker.clone());
                Ok(marker)
            }
        }
    }

    async fn confirm_marker(&self, goal_id: Uuid, period_key: &str) -> EngineResult<()> {
        let mut tables = self.inner.lock().await;
        match tables.markers.get_mut(&(goal_id, period_key.to_string())) {
            Some(marker) => {
                marker.status = MarkerStatus::Sent;
                Ok(())
            }
            None => Err(EngineError::StorageUnavailable(format!(
                "no claim for goal {goal_id} period {period_key}"
            ))),
        }
    }

    async fn release_marker(&self, goal_id: Uuid, period_key: &str) -> EngineResult<()> {
        let mut tables = self.inner.lock().await;
        let key = (goal_id, period_key.to_string());
        if tables
            .markers
            .get(&key)
            .is_some_and(|m| m.status == MarkerStatus::Pending)
        {
            tables.markers.remove(&key);
        }
        Ok(())
    }

    async fn prune_markers(&self, cutoff: DateTime<Utc>) -> EngineResult<u64> {
        let mut tables = self.inner.lock().await;
        let before = tables.markers.len();
        tables.markers.retain(|_, m| m.created_at >= cutoff);
        Ok((before - tables.markers.len()) as u64)
    }
}
