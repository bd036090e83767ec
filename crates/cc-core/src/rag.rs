use crate::error::RagError;
use crate::types::{DeltaId, DeltaStatus, ProjectId, RagBranchIndex, RagDeltaIndex};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaUpdate {
    pub status: DeltaStatus,
    pub delta_commit: Option<String>,
    pub chunk_count: Option<i64>,
    pub file_count: Option<i64>,
    pub error_message: Option<String>,
}

impl DeltaUpdate {
    pub fn to(status: DeltaStatus) -> Self {
        Self {
            status,
            delta_commit: None,
            chunk_count: None,
            file_count: None,
            error_message: None,
        }
    }
}

pub trait RagRepository {
    fn get_branch_index(
        &self,
        project_id: &ProjectId,
        branch: &str,
    ) -> Result<Option<RagBranchIndex>, RagError>;
    /// Upserts the branch row. `deleted_files` is unioned into the tombstone
    /// set and dropped from the per-file counts; `indexed_files` replaces the
    /// count of each file it names. `chunk_count` is the sum of the counts.
    fn record_branch_commit(
        &self,
        project_id: &ProjectId,
        branch: &str,
        commit_hash: &str,
        deleted_files: &BTreeSet<String>,
        indexed_files: &BTreeMap<String, i64>,
    ) -> Result<RagBranchIndex, RagError>;
    /// Removes the branch row and every delta for the branch. Returns the
    /// number of rows removed.
    fn delete_branch(&self, project_id: &ProjectId, branch: &str) -> Result<u64, RagError>;

    fn create_delta(
        &self,
        project_id: &ProjectId,
        branch: &str,
        base_branch: &str,
        base_commit: &str,
    ) -> Result<RagDeltaIndex, RagError>;
    fn get_delta(&self, id: &DeltaId) -> Result<Option<RagDeltaIndex>, RagError>;
    fn list_deltas(
        &self,
        project_id: &ProjectId,
        branch: &str,
    ) -> Result<Vec<RagDeltaIndex>, RagError>;
    fn update_delta(&self, id: &DeltaId, update: DeltaUpdate) -> Result<RagDeltaIndex, RagError>;
    /// Single-statement flip of every READY delta on `base_branch`.
    fn mark_stale_by_base(
        &self,
        project_id: &ProjectId,
        base_branch: &str,
    ) -> Result<Vec<RagDeltaIndex>, RagError>;
    /// Flips READY deltas of the branch to STALE, skipping `except`.
    fn supersede_ready(
        &self,
        project_id: &ProjectId,
        branch: &str,
        except: &DeltaId,
    ) -> Result<Vec<RagDeltaIndex>, RagError>;
    fn touch_delta(&self, id: &DeltaId, at: DateTime<Utc>) -> Result<(), RagError>;
    fn find_archivable(
        &self,
        idle_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<RagDeltaIndex>, RagError>;
    fn find_purgeable(&self, archived_before: DateTime<Utc>)
    -> Result<Vec<RagDeltaIndex>, RagError>;
    fn delete_delta(&self, id: &DeltaId) -> Result<(), RagError>;
}
