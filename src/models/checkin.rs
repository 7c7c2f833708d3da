use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Completions logged for one goal on one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkin {
    pub goal_id: Uuid,
    pub checkin_date: NaiveDate,
    pub count: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CheckinRequest {
    /// Default: today (UTC). Must be within ±1 day of server-now.
    pub date: Option<NaiveDate>,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckinQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl CheckinRequest {
    /// Validate date is within ±1 day of server-now
    pub fn validate_date(&self, server_today: NaiveDate) -> Result<NaiveDate, String> {
        let date = self.date.unwrap_or(server_today);
        let diff = (date - server_today).num_days().abs();
        if diff > 1 {
            return Err("Check-in date must be within ±1 day of today".into());
        }
        Ok(date)
    }
}
