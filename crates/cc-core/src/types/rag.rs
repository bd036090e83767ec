use crate::types::enums::DeltaStatus;
use crate::types::ids::{DeltaId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RagBranchIndex {
    pub project_id: ProjectId,
    pub branch: String,
    pub commit_hash: String,
    /// Tombstones. Only grows until the branch record is deleted.
    #[schema(value_type = Vec<String>)]
    pub deleted_files: BTreeSet<String>,
    /// Chunk count per file currently indexed for the branch.
    #[schema(value_type = Object)]
    pub indexed_files: BTreeMap<String, i64>,
    pub chunk_count: i64,
    pub updated_at: DateTime<Utc>,
}

impl RagBranchIndex {
    /// Deleted on this branch and not indexed again since.
    pub fn is_tombstoned(&self, path: &str) -> bool {
        self.deleted_files.contains(path) && !self.indexed_files.contains_key(path)
    }

    pub fn has_indexed(&self, path: &str) -> bool {
        self.indexed_files.contains_key(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RagDeltaIndex {
    pub id: DeltaId,
    pub project_id: ProjectId,
    pub branch: String,
    pub base_branch: String,
    pub base_commit: String,
    pub delta_commit: Option<String>,
    pub status: DeltaStatus,
    pub chunk_count: i64,
    pub file_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Addressable partition of the external vector index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum IndexScope {
    Branch { project_id: ProjectId, branch: String },
    Delta { project_id: ProjectId, delta_id: DeltaId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Chunk {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContextHit {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BranchIndexState {
    pub index: Option<RagBranchIndex>,
    pub deltas: Vec<RagDeltaIndex>,
}
