use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything an external sender needs to act on one missed period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyEvent {
    pub goal_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub period_key: String,
    pub deadline: NaiveDateTime,
    pub done: u32,
    pub required: u32,
}

#[async_trait]
pub trait PenaltySender: Send + Sync {
    /// Ok means the event was accepted for delivery.
    async fn send(&self, event: &PenaltyEvent) -> anyhow::Result<()>;
}

/// Records the penalty as a structured log line and accepts it.
#[derive(Debug, Clone, Default)]
pub struct LogPenaltySender;

#[async_trait]
impl PenaltySender for LogPenaltySender {
    async fn send(&self, event: &PenaltyEvent) -> anyhow::Result<()> {
        tracing::info!(
            goal_id = %event.goal_id,
            user_id = %event.user_id,
            title = %event.title,
            period_key = %event.period_key,
            deadline = %event.deadline,
            done = event.done,
            required = event.required,
            "Penalty dispatched"
        );
        Ok(())
    }
}

/// Posts the event as JSON to a configured endpoint.
#[derive(Debug, Clone)]
pub struct WebhookPenaltySender {
    client: reqwest::Client,
    url: String,
}

impl WebhookPenaltySender {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PenaltySender for WebhookPenaltySender {
    async fn send(&self, event: &PenaltyEvent) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(event).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Penalty webhook error {}: {}", status, body);
        }

        tracing::debug!(
            goal_id = %event.goal_id,
            period_key = %event.period_key,
            "Penalty webhook accepted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_penalty_event_payload_fields() {
        let event = PenaltyEvent {
            goal_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Run".into(),
            period_key: "2024-06-01".into(),
            deadline: NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(18, 0, 0)
                .unwrap(),
            done: 0,
            required: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["title"], "Run");
        assert_eq!(json["period_key"], "2024-06-01");
        assert_eq!(json["deadline"], "2024-06-01T18:00:00");
        assert!(json.get("goal_id").is_some());
        assert!(json.get("user_id").is_some());
    }

    #[tokio::test]
    async fn test_log_sender_accepts() {
        let event = PenaltyEvent {
            goal_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Read".into(),
            period_key: "2024-W23".into(),
            deadline: NaiveDate::from_ymd_opt(2024, 6, 9)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            done: 1,
            required: 2,
        };
        assert!(LogPenaltySender.send(&event).await.is_ok());
    }
}
