use crate::error::AnalysisError;
use crate::types::{
    AnalysisId, AnalysisStatus, CodeAnalysis, CodeAnalysisIssue, IssueId, NewAnalysis, ProjectId,
    ResolutionContext,
};

pub trait AnalysisRepository {
    /// Persists an ACCEPTED analysis, allocating the next PR version when the
    /// analysis belongs to a PR. Fails with `Duplicate` when an accepted
    /// analysis with the same fingerprint or PR version already exists.
    fn insert(&self, input: NewAnalysis) -> Result<CodeAnalysis, AnalysisError>;
    fn get(&self, id: &AnalysisId) -> Result<Option<CodeAnalysis>, AnalysisError>;
    fn find_accepted_by_fingerprint(
        &self,
        project_id: &ProjectId,
        fingerprint: &str,
    ) -> Result<Option<CodeAnalysis>, AnalysisError>;
    fn find_accepted_by_commit(
        &self,
        project_id: &ProjectId,
        commit_hash: &str,
    ) -> Result<Option<CodeAnalysis>, AnalysisError>;
    fn current_for_pr(
        &self,
        project_id: &ProjectId,
        pr_number: i64,
    ) -> Result<Option<CodeAnalysis>, AnalysisError>;
    fn set_status(
        &self,
        id: &AnalysisId,
        status: AnalysisStatus,
    ) -> Result<CodeAnalysis, AnalysisError>;
    fn unresolved_issues_for_pr(
        &self,
        project_id: &ProjectId,
        pr_number: i64,
    ) -> Result<Vec<CodeAnalysisIssue>, AnalysisError>;
    /// Sets resolution fields on issues that are still unresolved; returns
    /// how many rows changed.
    fn resolve_issues(
        &self,
        issue_ids: &[IssueId],
        context: &ResolutionContext,
    ) -> Result<u64, AnalysisError>;
}
