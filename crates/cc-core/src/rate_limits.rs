use crate::error::RateLimitError;
use crate::types::ProjectId;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub count: i64,
    pub window_start: DateTime<Utc>,
}

pub trait RateLimitRepository {
    /// Reads the project's current window and increments it in one step.
    /// Callers must run this inside `Store::with_tx`.
    fn try_consume(
        &self,
        project_id: &ProjectId,
        now: DateTime<Utc>,
        window_secs: i64,
        limit: i64,
    ) -> Result<RateDecision, RateLimitError>;
    fn purge(&self, before: DateTime<Utc>) -> Result<u64, RateLimitError>;
}
