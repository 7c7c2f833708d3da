#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid recurrence rule: {0}")]
    InvalidRecurrenceRule(String),

    #[error("Invalid check-in count: {0}")]
    InvalidCheckinCount(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A miss marker already exists for this goal and period.
    #[error("Miss already processed for goal {goal_id} period {period_key}")]
    DuplicateMiss {
        goal_id: uuid::Uuid,
        period_key: String,
    },
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidDate(_)
                | EngineError::InvalidRecurrenceRule(_)
                | EngineError::InvalidCheckinCount(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
