use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PullRequestMeta {
    pub number: i64,
    pub title: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub head_commit: String,
}

/// One file in a base..head comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChangedFile {
    pub path: String,
    pub deleted: bool,
}
