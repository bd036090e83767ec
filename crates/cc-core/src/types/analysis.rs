use crate::types::enums::{AnalysisResult, AnalysisStatus, IssueCategory, Severity};
use crate::types::ids::{AnalysisId, IssueId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SeverityCounts {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub info: i64,
}

impl SeverityCounts {
    pub fn tally<'a>(severities: impl IntoIterator<Item = &'a Severity>) -> Self {
        let mut counts = Self::default();
        for severity in severities {
            match severity {
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> i64 {
        self.high + self.medium + self.low + self.info
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CodeAnalysis {
    pub id: AnalysisId,
    pub project_id: ProjectId,
    pub commit_hash: String,
    pub pr_number: Option<i64>,
    pub pr_version: Option<i64>,
    pub branch: Option<String>,
    pub diff_fingerprint: Option<String>,
    pub counts: SeverityCounts,
    pub total_issues: i64,
    pub result: AnalysisResult,
    pub status: AnalysisStatus,
    pub issues: Vec<CodeAnalysisIssue>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IssueResolution {
    pub resolved_by_pr: Option<i64>,
    pub resolved_by_commit: String,
    pub resolved_by_analysis: AnalysisId,
    pub resolved_by: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CodeAnalysisIssue {
    pub id: IssueId,
    pub analysis_id: AnalysisId,
    pub category: IssueCategory,
    pub severity: Severity,
    pub file_path: String,
    pub line: Option<i64>,
    pub title: String,
    pub suggested_fix: Option<String>,
    pub vcs_author: Option<String>,
    pub resolution: Option<IssueResolution>,
}

impl CodeAnalysisIssue {
    pub fn identity_key(&self) -> String {
        issue_identity_key(&self.file_path, self.category, &self.title)
    }
}

/// Issue identity across analyses of the same PR: line numbers drift as code
/// moves, so only file, category and title participate.
pub fn issue_identity_key(file_path: &str, category: IssueCategory, title: &str) -> String {
    let title = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    format!("{file_path}\u{1f}{category:?}\u{1f}{title}")
}

/// One finding as returned by the AI collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AiIssue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub file_path: String,
    pub line: Option<i64>,
    pub title: String,
    pub suggested_fix: Option<String>,
    pub vcs_author: Option<String>,
}

impl AiIssue {
    pub fn identity_key(&self) -> String {
        issue_identity_key(&self.file_path, self.category, &self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewAnalysis {
    pub project_id: ProjectId,
    pub commit_hash: String,
    pub pr_number: Option<i64>,
    pub branch: Option<String>,
    pub diff_fingerprint: Option<String>,
    pub result: AnalysisResult,
    pub issues: Vec<AiIssue>,
}

/// Which PR/commit/analysis closed an issue; applied to older issues when a
/// newer analysis no longer reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResolutionContext {
    pub pr_number: Option<i64>,
    pub commit_hash: String,
    pub analysis_id: AnalysisId,
    pub actor: Option<String>,
}

/// Resolve issues of an earlier PR that a newly stored analysis no longer
/// reports. Used for PR re-analysis and for branch reconciliation after merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Reconciliation {
    pub pr_number: i64,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoredAnalysis {
    pub analysis: CodeAnalysis,
    pub resolved_issues: u64,
}
