use crate::util::{from_rfc3339, to_rfc3339};
use cc_core::error::RateLimitError;
use cc_core::rate_limits::{RateDecision, RateLimitRepository};
use cc_core::types::ProjectId;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};

pub struct RateLimitRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> RateLimitRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn storage(err: impl std::fmt::Display) -> RateLimitError {
    RateLimitError::Storage {
        message: err.to_string(),
    }
}

impl<'a> RateLimitRepository for RateLimitRepo<'a> {
    fn try_consume(
        &self,
        project_id: &ProjectId,
        now: DateTime<Utc>,
        window_secs: i64,
        limit: i64,
    ) -> Result<RateDecision, RateLimitError> {
        let current: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT window_start, count FROM command_rate_limits WHERE project_id = ?1",
                [project_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage)?;

        let window = Duration::seconds(window_secs.max(1));
        let (window_start, count) = match current {
            Some((start, count)) => {
                let start = from_rfc3339(&start).map_err(storage)?;
                if start + window > now {
                    (start, count)
                } else {
                    (now, 0)
                }
            }
            None => (now, 0),
        };
        if count >= limit {
            return Ok(RateDecision {
                allowed: false,
                count,
                window_start,
            });
        }

        let count = count + 1;
        self.conn
            .execute(
                "INSERT INTO command_rate_limits (project_id, window_start, count) VALUES (?1, ?2, ?3) ON CONFLICT(project_id) DO UPDATE SET window_start = excluded.window_start, count = excluded.count",
                params![project_id.as_str(), to_rfc3339(&window_start), count],
            )
            .map_err(storage)?;
        Ok(RateDecision {
            allowed: true,
            count,
            window_start,
        })
    }

    fn purge(&self, before: DateTime<Utc>) -> Result<u64, RateLimitError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM command_rate_limits WHERE window_start < ?1",
                [to_rfc3339(&before)],
            )
            .map_err(storage)?;
        Ok(affected as u64)
    }
}
