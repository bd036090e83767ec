use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339};
use cc_core::error::CodeCrowError;
use cc_core::events::EventRepository;
use cc_events::types::EventRecord;
use rusqlite::{Connection, Row, params};
use ulid::Ulid;

pub struct EventRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> EventRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn storage(err: impl std::fmt::Display) -> CodeCrowError {
    CodeCrowError::Internal {
        message: err.to_string(),
    }
}

impl<'a> EventRepository for EventRepo<'a> {
    fn append(&self, mut event: EventRecord) -> Result<EventRecord, CodeCrowError> {
        event.seq = next_seq(self.conn)?;
        event.id = format!("evt_{}", Ulid::new());
        self.conn
            .execute(
                "INSERT INTO events (id, seq, at, correlation_id, source, body_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id,
                    event.seq,
                    to_rfc3339(&event.at),
                    event.correlation_id,
                    encode_enum(&event.source).map_err(storage)?,
                    encode_json(&event.body).map_err(storage)?,
                ],
            )
            .map_err(storage)?;
        Ok(event)
    }

    fn list(
        &self,
        after: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<EventRecord>, CodeCrowError> {
        let limit = limit.map_or(-1, i64::from);
        let mut stmt = self
            .conn
            .prepare("SELECT id, seq, at, correlation_id, source, body_json FROM events WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2")
            .map_err(storage)?;
        let mut rows = stmt
            .query(params![after.unwrap_or(0), limit])
            .map_err(storage)?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            events.push(map_event_row(row)?);
        }
        Ok(events)
    }
}

fn next_seq(conn: &Connection) -> Result<i64, CodeCrowError> {
    conn.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM events", [], |row| {
        row.get(0)
    })
    .map_err(storage)
}

fn map_event_row(row: &Row<'_>) -> Result<EventRecord, CodeCrowError> {
    let at: String = row.get(2).map_err(storage)?;
    let source: String = row.get(4).map_err(storage)?;
    let body: String = row.get(5).map_err(storage)?;
    Ok(EventRecord {
        id: row.get(0).map_err(storage)?,
        seq: row.get(1).map_err(storage)?,
        at: from_rfc3339(&at).map_err(storage)?,
        correlation_id: row.get(3).map_err(storage)?,
        source: decode_enum(&source).map_err(storage)?,
        body: decode_json(&body).map_err(storage)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use crate::util::now;
    use cc_events::types::EventSource;
    use serde_json::json;

    fn record(kind: &str) -> EventRecord {
        EventRecord {
            id: String::new(),
            seq: 0,
            at: now(),
            correlation_id: Some("corr-7".to_string()),
            source: EventSource::Webhook,
            body: json!({ "type": kind }),
        }
    }

    #[test]
    fn test_append_assigns_monotonic_seq() {
        let conn = with_test_db().unwrap();
        let repo = EventRepo::new(&conn);
        let first = repo.append(record("JobCreated")).unwrap();
        let second = repo.append(record("JobStatusChanged")).unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert!(first.id.starts_with("evt_"));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_list_after_and_limit() {
        let conn = with_test_db().unwrap();
        let repo = EventRepo::new(&conn);
        for kind in ["A", "B", "C", "D"] {
            repo.append(record(kind)).unwrap();
        }

        let all = repo.list(None, None).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].body, json!({ "type": "A" }));
        assert_eq!(all[0].source, EventSource::Webhook);
        assert_eq!(all[0].correlation_id.as_deref(), Some("corr-7"));

        let page = repo.list(Some(1), Some(2)).unwrap();
        let seqs: Vec<i64> = page.iter().map(|event| event.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert!(repo.list(Some(4), None).unwrap().is_empty());
    }
}
