//! Outbound capabilities: VCS provider, AI model and vector index. Each is an
//! opaque async trait; HTTP implementations live in the server crate.

use crate::error::CollaboratorError;
use crate::types::{
    AiIssue, ChangedFile, Chunk, ContextHit, IndexScope, ProjectBinding, PullRequestMeta,
    VcsProvider,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait VcsClient: Send + Sync {
    async fn get_pr_diff(
        &self,
        project: &ProjectBinding,
        pr_number: i64,
    ) -> Result<String, CollaboratorError>;
    async fn get_commit_diff(
        &self,
        project: &ProjectBinding,
        commit: &str,
    ) -> Result<String, CollaboratorError>;
    async fn get_pull_request_meta(
        &self,
        project: &ProjectBinding,
        pr_number: i64,
    ) -> Result<PullRequestMeta, CollaboratorError>;
    /// Returns the provider's id for the new comment.
    async fn post_comment(
        &self,
        project: &ProjectBinding,
        pr_number: i64,
        body: &str,
    ) -> Result<String, CollaboratorError>;
    async fn update_comment(
        &self,
        project: &ProjectBinding,
        pr_number: i64,
        comment_id: &str,
        body: &str,
    ) -> Result<(), CollaboratorError>;
    async fn branch_head(
        &self,
        project: &ProjectBinding,
        branch: &str,
    ) -> Result<String, CollaboratorError>;
    async fn list_files(
        &self,
        project: &ProjectBinding,
        commit: &str,
    ) -> Result<Vec<String>, CollaboratorError>;
    async fn compare(
        &self,
        project: &ProjectBinding,
        base: &str,
        head: &str,
    ) -> Result<Vec<ChangedFile>, CollaboratorError>;
    /// `None` when the path does not exist at `commit`.
    async fn get_file_content(
        &self,
        project: &ProjectBinding,
        path: &str,
        commit: &str,
    ) -> Result<Option<String>, CollaboratorError>;
}

#[async_trait]
pub trait AiClient: Send + Sync {
    async fn run_analysis(
        &self,
        diff: &str,
        context: &[ContextHit],
    ) -> Result<Vec<AiIssue>, CollaboratorError>;
    async fn summarize(&self, diff: &str) -> Result<String, CollaboratorError>;
    async fn ask(
        &self,
        question: &str,
        diff: &str,
        context: &[ContextHit],
    ) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replaces any chunks already stored for the same paths in `scope`.
    async fn index_chunks(
        &self,
        scope: &IndexScope,
        chunks: &[Chunk],
    ) -> Result<(), CollaboratorError>;
    async fn query(
        &self,
        scope: &IndexScope,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ContextHit>, CollaboratorError>;
    /// Dropping an absent scope succeeds.
    async fn delete_scope(&self, scope: &IndexScope) -> Result<(), CollaboratorError>;
}

#[derive(Clone)]
pub struct Collaborators {
    vcs: HashMap<VcsProvider, Arc<dyn VcsClient>>,
    ai: Arc<dyn AiClient>,
    vectors: Arc<dyn VectorIndex>,
}

impl Collaborators {
    pub fn new(ai: Arc<dyn AiClient>, vectors: Arc<dyn VectorIndex>) -> Self {
        Self {
            vcs: HashMap::new(),
            ai,
            vectors,
        }
    }

    #[must_use]
    pub fn with_vcs(mut self, provider: VcsProvider, client: Arc<dyn VcsClient>) -> Self {
        self.vcs.insert(provider, client);
        self
    }

    pub fn vcs(&self, provider: VcsProvider) -> Result<Arc<dyn VcsClient>, CollaboratorError> {
        self.vcs
            .get(&provider)
            .cloned()
            .ok_or_else(|| CollaboratorError::ProviderNotConfigured {
                provider: provider.to_string(),
            })
    }

    pub fn ai(&self) -> &Arc<dyn AiClient> {
        &self.ai
    }

    pub fn vectors(&self) -> &Arc<dyn VectorIndex> {
        &self.vectors
    }
}
