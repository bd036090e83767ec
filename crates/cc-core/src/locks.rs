use crate::error::LockError;
use chrono::{DateTime, Utc};

/// Durable lease table backing the analysis lock. Expired leases are
/// reclaimable so a crashed holder never wedges a key.
pub trait LockRepository {
    fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LockError>;
    fn release(&self, key: &str, owner: &str) -> Result<bool, LockError>;
    fn holder(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>, LockError>;
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, LockError>;
}
