use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, now, to_rfc3339};
use cc_core::error::RagError;
use cc_core::rag::{DeltaUpdate, RagRepository};
use cc_core::types::{DeltaId, DeltaStatus, ProjectId, RagBranchIndex, RagDeltaIndex};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::collections::{BTreeMap, BTreeSet};

const DELTA_COLUMNS: &str = "id, project_id, branch, base_branch, base_commit, delta_commit, status, chunk_count, file_count, error_message, created_at, updated_at, last_accessed_at";

pub struct RagRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> RagRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_deltas(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RagDeltaIndex>, RagError> {
        let sql = format!("SELECT {DELTA_COLUMNS} FROM rag_delta_indexes WHERE {clause}");
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt.query(params).map_err(storage)?;
        let mut deltas = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            deltas.push(map_delta_row(row)?);
        }
        Ok(deltas)
    }

    /// Runs a single `UPDATE .. RETURNING id` flip and reloads the rows.
    fn flip_returning(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RagDeltaIndex>, RagError> {
        let ids: Vec<String> = {
            let mut stmt = self.conn.prepare(sql).map_err(storage)?;
            let rows = stmt
                .query_map(params, |row| row.get::<_, String>(0))
                .map_err(storage)?;
            rows.collect::<Result<_, _>>().map_err(storage)?
        };
        let mut deltas = Vec::new();
        for id in ids {
            let id = DeltaId::new(id).map_err(storage)?;
            if let Some(delta) = self.get_delta(&id)? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }
}

fn storage(err: impl std::fmt::Display) -> RagError {
    RagError::Storage {
        message: err.to_string(),
    }
}

impl<'a> RagRepository for RagRepo<'a> {
    fn get_branch_index(
        &self,
        project_id: &ProjectId,
        branch: &str,
    ) -> Result<Option<RagBranchIndex>, RagError> {
        let mut stmt = self
            .conn
            .prepare("SELECT project_id, branch, commit_hash, deleted_files_json, indexed_files_json, chunk_count, updated_at FROM rag_branch_indexes WHERE project_id = ?1 AND branch = ?2")
            .map_err(storage)?;
        let mut rows = stmt
            .query(params![project_id.as_str(), branch])
            .map_err(storage)?;
        match rows.next().map_err(storage)? {
            Some(row) => Ok(Some(map_branch_row(row)?)),
            None => Ok(None),
        }
    }

    fn record_branch_commit(
        &self,
        project_id: &ProjectId,
        branch: &str,
        commit_hash: &str,
        deleted_files: &BTreeSet<String>,
        indexed_files: &BTreeMap<String, i64>,
    ) -> Result<RagBranchIndex, RagError> {
        let existing = self.get_branch_index(project_id, branch)?;
        let (mut tombstones, mut files) = match existing {
            Some(index) => (index.deleted_files, index.indexed_files),
            None => (BTreeSet::new(), BTreeMap::new()),
        };
        tombstones.extend(deleted_files.iter().cloned());
        files.retain(|path, _| !deleted_files.contains(path));
        files.extend(
            indexed_files
                .iter()
                .map(|(path, chunks)| (path.clone(), *chunks)),
        );

        let index = RagBranchIndex {
            project_id: project_id.clone(),
            branch: branch.to_string(),
            commit_hash: commit_hash.to_string(),
            deleted_files: tombstones,
            chunk_count: files.values().sum(),
            indexed_files: files,
            updated_at: now(),
        };
        self.conn
            .execute(
                "INSERT INTO rag_branch_indexes (project_id, branch, commit_hash, deleted_files_json, indexed_files_json, chunk_count, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) ON CONFLICT(project_id, branch) DO UPDATE SET commit_hash = excluded.commit_hash, deleted_files_json = excluded.deleted_files_json, indexed_files_json = excluded.indexed_files_json, chunk_count = excluded.chunk_count, updated_at = excluded.updated_at",
                params![
                    index.project_id.as_str(),
                    index.branch,
                    index.commit_hash,
                    encode_json(&index.deleted_files).map_err(storage)?,
                    encode_json(&index.indexed_files).map_err(storage)?,
                    index.chunk_count,
                    to_rfc3339(&index.updated_at),
                ],
            )
            .map_err(storage)?;
        Ok(index)
    }

    fn delete_branch(&self, project_id: &ProjectId, branch: &str) -> Result<u64, RagError> {
        let deltas = self
            .conn
            .execute(
                "DELETE FROM rag_delta_indexes WHERE project_id = ?1 AND branch = ?2",
                params![project_id.as_str(), branch],
            )
            .map_err(storage)?;
        let rows = self
            .conn
            .execute(
                "DELETE FROM rag_branch_indexes WHERE project_id = ?1 AND branch = ?2",
                params![project_id.as_str(), branch],
            )
            .map_err(storage)?;
        Ok((deltas + rows) as u64)
    }

    fn create_delta(
        &self,
        project_id: &ProjectId,
        branch: &str,
        base_branch: &str,
        base_commit: &str,
    ) -> Result<RagDeltaIndex, RagError> {
        let created_at = now();
        let delta = RagDeltaIndex {
            id: DeltaId::generate(),
            project_id: project_id.clone(),
            branch: branch.to_string(),
            base_branch: base_branch.to_string(),
            base_commit: base_commit.to_string(),
            delta_commit: None,
            status: DeltaStatus::Creating,
            chunk_count: 0,
            file_count: 0,
            error_message: None,
            created_at,
            updated_at: created_at,
            last_accessed_at: created_at,
        };
        let sql = format!(
            "INSERT INTO rag_delta_indexes ({DELTA_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, 0, 0, NULL, ?7, ?7, ?7)"
        );
        self.conn
            .execute(
                &sql,
                params![
                    delta.id.as_str(),
                    delta.project_id.as_str(),
                    delta.branch,
                    delta.base_branch,
                    delta.base_commit,
                    encode_enum(&delta.status).map_err(storage)?,
                    to_rfc3339(&created_at),
                ],
            )
            .map_err(storage)?;
        Ok(delta)
    }

    fn get_delta(&self, id: &DeltaId) -> Result<Option<RagDeltaIndex>, RagError> {
        Ok(self
            .query_deltas("id = ?1", [id.as_str()])?
            .into_iter()
            .next())
    }

    fn list_deltas(
        &self,
        project_id: &ProjectId,
        branch: &str,
    ) -> Result<Vec<RagDeltaIndex>, RagError> {
        self.query_deltas(
            "project_id = ?1 AND branch = ?2 ORDER BY created_at DESC, id DESC",
            params![project_id.as_str(), branch],
        )
    }

    fn update_delta(&self, id: &DeltaId, update: DeltaUpdate) -> Result<RagDeltaIndex, RagError> {
        let affected = self
            .conn
            .execute(
                "UPDATE rag_delta_indexes SET status = ?1, delta_commit = COALESCE(?2, delta_commit), chunk_count = COALESCE(?3, chunk_count), file_count = COALESCE(?4, file_count), error_message = COALESCE(?5, error_message), updated_at = ?6 WHERE id = ?7",
                params![
                    encode_enum(&update.status).map_err(storage)?,
                    update.delta_commit,
                    update.chunk_count,
                    update.file_count,
                    update.error_message,
                    to_rfc3339(&now()),
                    id.as_str(),
                ],
            )
            .map_err(storage)?;
        if affected == 0 {
            return Err(RagError::DeltaNotFound);
        }
        self.get_delta(id)?.ok_or(RagError::DeltaNotFound)
    }

    fn mark_stale_by_base(
        &self,
        project_id: &ProjectId,
        base_branch: &str,
    ) -> Result<Vec<RagDeltaIndex>, RagError> {
        self.flip_returning(
            "UPDATE rag_delta_indexes SET status = 'Stale', updated_at = ?1 WHERE project_id = ?2 AND base_branch = ?3 AND status = 'Ready' RETURNING id",
            params![to_rfc3339(&now()), project_id.as_str(), base_branch],
        )
    }

    fn supersede_ready(
        &self,
        project_id: &ProjectId,
        branch: &str,
        except: &DeltaId,
    ) -> Result<Vec<RagDeltaIndex>, RagError> {
        self.flip_returning(
            "UPDATE rag_delta_indexes SET status = 'Stale', updated_at = ?1 WHERE project_id = ?2 AND branch = ?3 AND status = 'Ready' AND id != ?4 RETURNING id",
            params![
                to_rfc3339(&now()),
                project_id.as_str(),
                branch,
                except.as_str()
            ],
        )
    }

    fn touch_delta(&self, id: &DeltaId, at: DateTime<Utc>) -> Result<(), RagError> {
        self.conn
            .execute(
                "UPDATE rag_delta_indexes SET last_accessed_at = ?1 WHERE id = ?2",
                params![to_rfc3339(&at), id.as_str()],
            )
            .map_err(storage)?;
        Ok(())
    }

    fn find_archivable(
        &self,
        idle_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<RagDeltaIndex>, RagError> {
        self.query_deltas(
            "(status = 'Ready' AND last_accessed_at < ?1) OR (status IN ('Stale', 'Failed') AND MAX(updated_at, last_accessed_at) < ?2) ORDER BY created_at ASC",
            params![to_rfc3339(&idle_before), to_rfc3339(&stale_before)],
        )
    }

    fn find_purgeable(
        &self,
        archived_before: DateTime<Utc>,
    ) -> Result<Vec<RagDeltaIndex>, RagError> {
        self.query_deltas(
            "status = 'Archived' AND updated_at < ?1 ORDER BY updated_at ASC",
            [to_rfc3339(&archived_before)],
        )
    }

    fn delete_delta(&self, id: &DeltaId) -> Result<(), RagError> {
        self.conn
            .execute("DELETE FROM rag_delta_indexes WHERE id = ?1", [id.as_str()])
            .map_err(storage)?;
        Ok(())
    }
}

fn map_branch_row(row: &Row<'_>) -> Result<RagBranchIndex, RagError> {
    let project_id: String = row.get(0).map_err(storage)?;
    let deleted_files: String = row.get(3).map_err(storage)?;
    let indexed_files: String = row.get(4).map_err(storage)?;
    let updated_at: String = row.get(6).map_err(storage)?;
    Ok(RagBranchIndex {
        project_id: ProjectId::new(project_id).map_err(storage)?,
        branch: row.get(1).map_err(storage)?,
        commit_hash: row.get(2).map_err(storage)?,
        deleted_files: decode_json(&deleted_files).map_err(storage)?,
        indexed_files: decode_json(&indexed_files).map_err(storage)?,
        chunk_count: row.get(5).map_err(storage)?,
        updated_at: from_rfc3339(&updated_at).map_err(storage)?,
    })
}

fn map_delta_row(row: &Row<'_>) -> Result<RagDeltaIndex, RagError> {
    let id: String = row.get(0).map_err(storage)?;
    let project_id: String = row.get(1).map_err(storage)?;
    let status: String = row.get(6).map_err(storage)?;
    let created_at: String = row.get(10).map_err(storage)?;
    let updated_at: String = row.get(11).map_err(storage)?;
    let last_accessed_at: String = row.get(12).map_err(storage)?;
    Ok(RagDeltaIndex {
        id: DeltaId::new(id).map_err(storage)?,
        project_id: ProjectId::new(project_id).map_err(storage)?,
        branch: row.get(2).map_err(storage)?,
        base_branch: row.get(3).map_err(storage)?,
        base_commit: row.get(4).map_err(storage)?,
        delta_commit: row.get(5).map_err(storage)?,
        status: decode_enum(&status).map_err(storage)?,
        chunk_count: row.get(7).map_err(storage)?,
        file_count: row.get(8).map_err(storage)?,
        error_message: row.get(9).map_err(storage)?,
        created_at: from_rfc3339(&created_at).map_err(storage)?,
        updated_at: from_rfc3339(&updated_at).map_err(storage)?,
        last_accessed_at: from_rfc3339(&last_accessed_at).map_err(storage)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::Duration;

    fn paths(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    fn counts(values: &[(&str, i64)]) -> BTreeMap<String, i64> {
        values
            .iter()
            .map(|(path, chunks)| ((*path).to_string(), *chunks))
            .collect()
    }

    fn ready_delta(repo: &RagRepo<'_>, project_id: &ProjectId, branch: &str) -> RagDeltaIndex {
        let delta = repo
            .create_delta(project_id, branch, "main", "base1")
            .unwrap();
        repo.update_delta(
            &delta.id,
            DeltaUpdate {
                delta_commit: Some("head1".to_string()),
                chunk_count: Some(12),
                file_count: Some(3),
                ..DeltaUpdate::to(DeltaStatus::Ready)
            },
        )
        .unwrap()
    }

    #[test]
    fn test_branch_commit_tracks_tombstones() {
        let conn = with_test_db().unwrap();
        let repo = RagRepo::new(&conn);
        let project_id = ProjectId::generate();

        repo.record_branch_commit(
            &project_id,
            "main",
            "c1",
            &paths(&[]),
            &counts(&[("old.rs", 30), ("gone.rs", 10)]),
        )
        .unwrap();
        let index = repo
            .record_branch_commit(
                &project_id,
                "main",
                "c2",
                &paths(&["gone.rs"]),
                &counts(&[("new.rs", 5)]),
            )
            .unwrap();
        assert_eq!(index.commit_hash, "c2");
        assert_eq!(index.chunk_count, 35);
        assert_eq!(index.deleted_files, paths(&["gone.rs"]));
        assert!(index.is_tombstoned("gone.rs"));
        assert!(!index.has_indexed("gone.rs"));

        let loaded = repo.get_branch_index(&project_id, "main").unwrap().unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_readded_file_keeps_tombstone_but_is_live() {
        let conn = with_test_db().unwrap();
        let repo = RagRepo::new(&conn);
        let project_id = ProjectId::generate();

        repo.record_branch_commit(&project_id, "main", "c1", &paths(&["lib.rs"]), &counts(&[]))
            .unwrap();
        let index = repo
            .record_branch_commit(
                &project_id,
                "main",
                "c2",
                &paths(&[]),
                &counts(&[("lib.rs", 2)]),
            )
            .unwrap();
        assert!(index.deleted_files.contains("lib.rs"));
        assert!(!index.is_tombstoned("lib.rs"));
        assert_eq!(index.chunk_count, 2);
    }

    #[test]
    fn test_reindexing_a_file_replaces_its_chunk_count() {
        let conn = with_test_db().unwrap();
        let repo = RagRepo::new(&conn);
        let project_id = ProjectId::generate();

        repo.record_branch_commit(
            &project_id,
            "main",
            "c1",
            &paths(&[]),
            &counts(&[("lib.rs", 4), ("main.rs", 3)]),
        )
        .unwrap();
        for commit in ["c2", "c3", "c4"] {
            repo.record_branch_commit(
                &project_id,
                "main",
                commit,
                &paths(&[]),
                &counts(&[("lib.rs", 4)]),
            )
            .unwrap();
        }
        let index = repo.get_branch_index(&project_id, "main").unwrap().unwrap();
        assert_eq!(index.chunk_count, 7);
        assert_eq!(index.indexed_files.get("lib.rs"), Some(&4));
    }

    #[test]
    fn test_delta_lifecycle_fields() {
        let conn = with_test_db().unwrap();
        let repo = RagRepo::new(&conn);
        let project_id = ProjectId::generate();
        let delta = repo
            .create_delta(&project_id, "feature/x", "main", "base1")
            .unwrap();
        assert_eq!(delta.status, DeltaStatus::Creating);
        assert_eq!(repo.get_delta(&delta.id).unwrap().unwrap(), delta);

        let failed = repo
            .update_delta(
                &delta.id,
                DeltaUpdate {
                    error_message: Some("vcs down".to_string()),
                    ..DeltaUpdate::to(DeltaStatus::Failed)
                },
            )
            .unwrap();
        assert_eq!(failed.status, DeltaStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("vcs down"));
        assert!(matches!(
            repo.update_delta(&DeltaId::generate(), DeltaUpdate::to(DeltaStatus::Ready)),
            Err(RagError::DeltaNotFound)
        ));
    }

    #[test]
    fn test_mark_stale_by_base_flips_only_ready() {
        let conn = with_test_db().unwrap();
        let repo = RagRepo::new(&conn);
        let project_id = ProjectId::generate();
        let first = ready_delta(&repo, &project_id, "feature/a");
        let second = ready_delta(&repo, &project_id, "feature/b");
        let creating = repo
            .create_delta(&project_id, "feature/c", "main", "base1")
            .unwrap();

        let stale = repo.mark_stale_by_base(&project_id, "main").unwrap();
        let mut ids: Vec<DeltaId> = stale.iter().map(|delta| delta.id.clone()).collect();
        ids.sort();
        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(ids, expected);
        assert!(stale.iter().all(|delta| delta.status == DeltaStatus::Stale));
        assert_eq!(
            repo.get_delta(&creating.id).unwrap().unwrap().status,
            DeltaStatus::Creating
        );
        assert!(repo.mark_stale_by_base(&project_id, "main").unwrap().is_empty());
    }

    #[test]
    fn test_supersede_ready_keeps_single_ready() {
        let conn = with_test_db().unwrap();
        let repo = RagRepo::new(&conn);
        let project_id = ProjectId::generate();
        let old = ready_delta(&repo, &project_id, "feature/a");
        let new = repo
            .create_delta(&project_id, "feature/a", "main", "base1")
            .unwrap();

        let superseded = repo.supersede_ready(&project_id, "feature/a", &new.id).unwrap();
        assert_eq!(superseded.len(), 1);
        assert_eq!(superseded[0].id, old.id);
        repo.update_delta(&new.id, DeltaUpdate::to(DeltaStatus::Ready))
            .unwrap();

        let deltas = repo.list_deltas(&project_id, "feature/a").unwrap();
        let ready: Vec<_> = deltas
            .iter()
            .filter(|delta| delta.status == DeltaStatus::Ready)
            .collect();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, new.id);
    }

    #[test]
    fn test_archive_and_purge_candidates() {
        let conn = with_test_db().unwrap();
        let repo = RagRepo::new(&conn);
        let project_id = ProjectId::generate();
        let idle = ready_delta(&repo, &project_id, "feature/a");
        let later = now() + Duration::days(30);

        let candidates = repo.find_archivable(later, later).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, idle.id);

        repo.touch_delta(&idle.id, later + Duration::seconds(1)).unwrap();
        assert!(repo.find_archivable(later, later).unwrap().is_empty());

        repo.update_delta(&idle.id, DeltaUpdate::to(DeltaStatus::Archived))
            .unwrap();
        let purgeable = repo.find_purgeable(later).unwrap();
        assert_eq!(purgeable.len(), 1);
        repo.delete_delta(&idle.id).unwrap();
        repo.delete_delta(&idle.id).unwrap();
        assert!(repo.get_delta(&idle.id).unwrap().is_none());
    }

    #[test]
    fn test_delete_branch_is_idempotent() {
        let conn = with_test_db().unwrap();
        let repo = RagRepo::new(&conn);
        let project_id = ProjectId::generate();
        repo.record_branch_commit(&project_id, "feature/a", "c1", &paths(&[]), &counts(&[]))
            .unwrap();
        ready_delta(&repo, &project_id, "feature/a");
        ready_delta(&repo, &project_id, "feature/b");

        assert_eq!(repo.delete_branch(&project_id, "feature/a").unwrap(), 2);
        assert_eq!(repo.delete_branch(&project_id, "feature/a").unwrap(), 0);
        assert_eq!(repo.list_deltas(&project_id, "feature/b").unwrap().len(), 1);
    }
}
