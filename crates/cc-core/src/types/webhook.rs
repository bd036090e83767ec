use crate::types::enums::VcsProvider;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub enum EventKind {
    /// PR opened, reopened or updated with new commits.
    PullRequestUpdated,
    PullRequestMerged,
    Push,
    BranchDeleted,
    CommentCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub enum CommandKind {
    Analyze,
    Summarize,
    Review,
    Ask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CommentDirective {
    pub command: CommandKind,
    pub args: Option<String>,
    pub comment_id: String,
    pub author: Option<String>,
}

/// Provider-neutral shape every inbound webhook is reduced to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NormalizedEvent {
    pub provider: VcsProvider,
    pub kind: EventKind,
    pub repo_full_name: String,
    pub pr_number: Option<i64>,
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub commit_hash: Option<String>,
    pub merge_commit: Option<String>,
    pub comment: Option<CommentDirective>,
    pub actor: Option<String>,
}

impl NormalizedEvent {
    /// Branch whose patterns decide whether the event is analyzed: the PR's
    /// target branch, or the pushed/deleted branch itself.
    pub fn routing_branch(&self) -> Option<&str> {
        match self.kind {
            EventKind::Push | EventKind::BranchDeleted => self.source_branch.as_deref(),
            _ => self
                .target_branch
                .as_deref()
                .or(self.source_branch.as_deref()),
        }
    }
}
