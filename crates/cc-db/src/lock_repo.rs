use crate::util::to_rfc3339;
use cc_core::error::LockError;
use cc_core::locks::LockRepository;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

pub struct LockRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> LockRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn storage(err: impl std::fmt::Display) -> LockError {
    LockError::Storage {
        message: err.to_string(),
    }
}

impl<'a> LockRepository for LockRepo<'a> {
    /// Inserts the lease, or takes over a row whose lease has expired. A live
    /// lease held by anyone leaves the row untouched.
    fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        let affected = self
            .conn
            .execute(
                "INSERT INTO analysis_locks (key, owner, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4) ON CONFLICT(key) DO UPDATE SET owner = excluded.owner, acquired_at = excluded.acquired_at, expires_at = excluded.expires_at WHERE analysis_locks.expires_at <= excluded.acquired_at",
                params![key, owner, to_rfc3339(&now), to_rfc3339(&expires_at)],
            )
            .map_err(storage)?;
        Ok(affected > 0)
    }

    fn release(&self, key: &str, owner: &str) -> Result<bool, LockError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM analysis_locks WHERE key = ?1 AND owner = ?2",
                params![key, owner],
            )
            .map_err(storage)?;
        Ok(affected > 0)
    }

    fn holder(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>, LockError> {
        self.conn
            .query_row(
                "SELECT owner FROM analysis_locks WHERE key = ?1 AND expires_at > ?2",
                params![key, to_rfc3339(&now)],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, LockError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM analysis_locks WHERE expires_at <= ?1",
                [to_rfc3339(&now)],
            )
            .map_err(storage)?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use crate::util::now;
    use chrono::Duration;

    #[test]
    fn test_live_lease_is_exclusive() {
        let conn = with_test_db().unwrap();
        let repo = LockRepo::new(&conn);
        let start = now();
        let expires = start + Duration::minutes(30);

        assert!(repo.try_acquire("analysis:p:fp", "a", start, expires).unwrap());
        assert!(!repo.try_acquire("analysis:p:fp", "b", start, expires).unwrap());
        assert!(repo.try_acquire("analysis:p:other", "b", start, expires).unwrap());
        assert_eq!(
            repo.holder("analysis:p:fp", start).unwrap().as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_expired_lease_is_reclaimed() {
        let conn = with_test_db().unwrap();
        let repo = LockRepo::new(&conn);
        let start = now();
        assert!(
            repo.try_acquire("k", "crashed", start, start + Duration::seconds(5))
                .unwrap()
        );

        let later = start + Duration::seconds(10);
        assert!(repo.holder("k", later).unwrap().is_none());
        assert!(
            repo.try_acquire("k", "next", later, later + Duration::seconds(5))
                .unwrap()
        );
        assert!(!repo.release("k", "crashed").unwrap());
        assert!(repo.release("k", "next").unwrap());
        assert!(repo.holder("k", later).unwrap().is_none());
    }

    #[test]
    fn test_purge_expired() {
        let conn = with_test_db().unwrap();
        let repo = LockRepo::new(&conn);
        let start = now();
        repo.try_acquire("old", "a", start, start + Duration::seconds(1))
            .unwrap();
        repo.try_acquire("live", "b", start, start + Duration::hours(1))
            .unwrap();
        assert_eq!(repo.purge_expired(start + Duration::seconds(2)).unwrap(), 1);
        assert!(repo.holder("live", start).unwrap().is_some());
    }
}
