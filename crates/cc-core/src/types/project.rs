use crate::types::enums::VcsProvider;
use crate::types::ids::{ProjectId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A project's binding to a VCS repository plus the per-project analysis
/// switches consulted when routing webhooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProjectBinding {
    pub id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub provider: VcsProvider,
    pub repo_full_name: String,
    pub active: bool,
    pub default_branch: String,
    pub branch_patterns: Vec<String>,
    pub pr_analysis_enabled: bool,
    pub branch_analysis_enabled: bool,
    pub rag_enabled: bool,
    pub commands_enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegisterProjectInput {
    pub workspace_id: WorkspaceId,
    pub provider: VcsProvider,
    pub repo_full_name: String,
    pub default_branch: Option<String>,
    #[serde(default)]
    pub branch_patterns: Vec<String>,
    pub pr_analysis_enabled: Option<bool>,
    pub branch_analysis_enabled: Option<bool>,
    pub rag_enabled: Option<bool>,
    pub commands_enabled: Option<bool>,
}
