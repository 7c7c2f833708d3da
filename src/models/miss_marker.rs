use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarkerStatus {
    /// Claimed by a sweeper that has not yet confirmed delivery.
    Pending,
    Sent,
}

/// Claim on, and later proof of, a penalty dispatch for one goal and period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissMarker {
    pub goal_id: Uuid,
    pub period_key: String,
    pub status: MarkerStatus,
    pub created_at: DateTime<Utc>,
    pub claimed_at: DateTime<Utc>,
}
