use crate::util::{
    decode_enum, encode_enum, from_rfc3339, is_constraint_violation, now, to_rfc3339,
};
use cc_core::analyses::AnalysisRepository;
use cc_core::error::AnalysisError;
use cc_core::types::{
    AnalysisId, AnalysisStatus, CodeAnalysis, CodeAnalysisIssue, IssueId, IssueResolution,
    NewAnalysis, ProjectId, ResolutionContext, SeverityCounts,
};
use rusqlite::{Connection, Row, params};

const ANALYSIS_COLUMNS: &str = "id, project_id, commit_hash, pr_number, pr_version, branch, diff_fingerprint, high_count, medium_count, low_count, info_count, total_issues, result, status, created_at";

const ISSUE_COLUMNS: &str = "id, analysis_id, category, severity, file_path, line, title, suggested_fix, vcs_author, resolved_by_pr, resolved_by_commit, resolved_by_analysis, resolved_by, resolved_at";

pub struct AnalysisRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> AnalysisRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn next_pr_version(&self, project_id: &ProjectId, pr_number: i64) -> Result<i64, AnalysisError> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(pr_version), 0) + 1 FROM analyses WHERE project_id = ?1 AND pr_number = ?2",
                params![project_id.as_str(), pr_number],
                |row| row.get(0),
            )
            .map_err(storage)
    }

    fn query_one(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<CodeAnalysis>, AnalysisError> {
        let sql = format!("SELECT {ANALYSIS_COLUMNS} FROM analyses WHERE {clause} LIMIT 1");
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt.query(params).map_err(storage)?;
        let Some(row) = rows.next().map_err(storage)? else {
            return Ok(None);
        };
        let mut analysis = map_analysis_row(row)?;
        analysis.issues = self.load_issues(&analysis.id)?;
        Ok(Some(analysis))
    }

    fn load_issues(&self, analysis_id: &AnalysisId) -> Result<Vec<CodeAnalysisIssue>, AnalysisError> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE analysis_id = ?1 ORDER BY ordinal ASC");
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt.query([analysis_id.as_str()]).map_err(storage)?;
        let mut issues = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            issues.push(map_issue_row(row)?);
        }
        Ok(issues)
    }
}

fn storage(err: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Storage {
        message: err.to_string(),
    }
}

impl<'a> AnalysisRepository for AnalysisRepo<'a> {
    fn insert(&self, input: NewAnalysis) -> Result<CodeAnalysis, AnalysisError> {
        let pr_version = match input.pr_number {
            Some(pr_number) => Some(self.next_pr_version(&input.project_id, pr_number)?),
            None => None,
        };
        let counts = SeverityCounts::tally(input.issues.iter().map(|issue| &issue.severity));
        let id = AnalysisId::generate();
        let issues: Vec<CodeAnalysisIssue> = input
            .issues
            .into_iter()
            .map(|issue| CodeAnalysisIssue {
                id: IssueId::generate(),
                analysis_id: id.clone(),
                category: issue.category,
                severity: issue.severity,
                file_path: issue.file_path,
                line: issue.line,
                title: issue.title,
                suggested_fix: issue.suggested_fix,
                vcs_author: issue.vcs_author,
                resolution: None,
            })
            .collect();
        let analysis = CodeAnalysis {
            id,
            project_id: input.project_id,
            commit_hash: input.commit_hash,
            pr_number: input.pr_number,
            pr_version,
            branch: input.branch,
            diff_fingerprint: input.diff_fingerprint,
            counts,
            total_issues: counts.total(),
            result: input.result,
            status: AnalysisStatus::Accepted,
            issues,
            created_at: now(),
        };

        let sql = format!(
            "INSERT INTO analyses ({ANALYSIS_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        );
        let inserted = self.conn.execute(
            &sql,
            params![
                analysis.id.as_str(),
                analysis.project_id.as_str(),
                analysis.commit_hash,
                analysis.pr_number,
                analysis.pr_version,
                analysis.branch,
                analysis.diff_fingerprint,
                analysis.counts.high,
                analysis.counts.medium,
                analysis.counts.low,
                analysis.counts.info,
                analysis.total_issues,
                encode_enum(&analysis.result).map_err(storage)?,
                encode_enum(&analysis.status).map_err(storage)?,
                to_rfc3339(&analysis.created_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => return Err(AnalysisError::Duplicate),
            Err(err) => return Err(storage(err)),
        }

        let sql = format!(
            "INSERT INTO issues (ordinal, {ISSUE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, NULL, NULL, NULL, NULL)"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        for (ordinal, issue) in analysis.issues.iter().enumerate() {
            stmt.execute(params![
                i64::try_from(ordinal).map_err(storage)?,
                issue.id.as_str(),
                issue.analysis_id.as_str(),
                encode_enum(&issue.category).map_err(storage)?,
                encode_enum(&issue.severity).map_err(storage)?,
                issue.file_path,
                issue.line,
                issue.title,
                issue.suggested_fix,
                issue.vcs_author,
            ])
            .map_err(storage)?;
        }
        Ok(analysis)
    }

    fn get(&self, id: &AnalysisId) -> Result<Option<CodeAnalysis>, AnalysisError> {
        self.query_one("id = ?1", [id.as_str()])
    }

    fn find_accepted_by_fingerprint(
        &self,
        project_id: &ProjectId,
        fingerprint: &str,
    ) -> Result<Option<CodeAnalysis>, AnalysisError> {
        self.query_one(
            "project_id = ?1 AND diff_fingerprint = ?2 AND status = 'Accepted' ORDER BY created_at DESC",
            params![project_id.as_str(), fingerprint],
        )
    }

    fn find_accepted_by_commit(
        &self,
        project_id: &ProjectId,
        commit_hash: &str,
    ) -> Result<Option<CodeAnalysis>, AnalysisError> {
        self.query_one(
            "project_id = ?1 AND commit_hash = ?2 AND status = 'Accepted' ORDER BY created_at DESC",
            params![project_id.as_str(), commit_hash],
        )
    }

    fn current_for_pr(
        &self,
        project_id: &ProjectId,
        pr_number: i64,
    ) -> Result<Option<CodeAnalysis>, AnalysisError> {
        self.query_one(
            "project_id = ?1 AND pr_number = ?2 AND status = 'Accepted' ORDER BY pr_version DESC",
            params![project_id.as_str(), pr_number],
        )
    }

    fn set_status(
        &self,
        id: &AnalysisId,
        status: AnalysisStatus,
    ) -> Result<CodeAnalysis, AnalysisError> {
        let affected = self
            .conn
            .execute(
                "UPDATE analyses SET status = ?1 WHERE id = ?2",
                params![encode_enum(&status).map_err(storage)?, id.as_str()],
            )
            .map_err(|err| {
                if is_constraint_violation(&err) {
                    AnalysisError::Duplicate
                } else {
                    storage(err)
                }
            })?;
        if affected == 0 {
            return Err(AnalysisError::NotFound);
        }
        self.get(id)?.ok_or(AnalysisError::NotFound)
    }

    fn unresolved_issues_for_pr(
        &self,
        project_id: &ProjectId,
        pr_number: i64,
    ) -> Result<Vec<CodeAnalysisIssue>, AnalysisError> {
        let columns = ISSUE_COLUMNS
            .split(", ")
            .map(|column| format!("i.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns} FROM issues i JOIN analyses a ON a.id = i.analysis_id WHERE a.project_id = ?1 AND a.pr_number = ?2 AND i.resolved_at IS NULL ORDER BY a.pr_version ASC, i.ordinal ASC"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt
            .query(params![project_id.as_str(), pr_number])
            .map_err(storage)?;
        let mut issues = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            issues.push(map_issue_row(row)?);
        }
        Ok(issues)
    }

    fn resolve_issues(
        &self,
        issue_ids: &[IssueId],
        context: &ResolutionContext,
    ) -> Result<u64, AnalysisError> {
        let resolved_at = to_rfc3339(&now());
        let mut stmt = self
            .conn
            .prepare("UPDATE issues SET resolved_by_pr = ?1, resolved_by_commit = ?2, resolved_by_analysis = ?3, resolved_by = ?4, resolved_at = ?5 WHERE id = ?6 AND resolved_at IS NULL")
            .map_err(storage)?;
        let mut resolved = 0u64;
        for id in issue_ids {
            let affected = stmt
                .execute(params![
                    context.pr_number,
                    context.commit_hash,
                    context.analysis_id.as_str(),
                    context.actor,
                    resolved_at,
                    id.as_str(),
                ])
                .map_err(storage)?;
            resolved += affected as u64;
        }
        Ok(resolved)
    }
}

fn map_analysis_row(row: &Row<'_>) -> Result<CodeAnalysis, AnalysisError> {
    let id: String = row.get(0).map_err(storage)?;
    let project_id: String = row.get(1).map_err(storage)?;
    let result: String = row.get(12).map_err(storage)?;
    let status: String = row.get(13).map_err(storage)?;
    let created_at: String = row.get(14).map_err(storage)?;
    Ok(CodeAnalysis {
        id: AnalysisId::new(id).map_err(storage)?,
        project_id: ProjectId::new(project_id).map_err(storage)?,
        commit_hash: row.get(2).map_err(storage)?,
        pr_number: row.get(3).map_err(storage)?,
        pr_version: row.get(4).map_err(storage)?,
        branch: row.get(5).map_err(storage)?,
        diff_fingerprint: row.get(6).map_err(storage)?,
        counts: SeverityCounts {
            high: row.get(7).map_err(storage)?,
            medium: row.get(8).map_err(storage)?,
            low: row.get(9).map_err(storage)?,
            info: row.get(10).map_err(storage)?,
        },
        total_issues: row.get(11).map_err(storage)?,
        result: decode_enum(&result).map_err(storage)?,
        status: decode_enum(&status).map_err(storage)?,
        issues: Vec::new(),
        created_at: from_rfc3339(&created_at).map_err(storage)?,
    })
}

fn map_issue_row(row: &Row<'_>) -> Result<CodeAnalysisIssue, AnalysisError> {
    let id: String = row.get(0).map_err(storage)?;
    let analysis_id: String = row.get(1).map_err(storage)?;
    let category: String = row.get(2).map_err(storage)?;
    let severity: String = row.get(3).map_err(storage)?;
    let resolved_by_commit: Option<String> = row.get(10).map_err(storage)?;
    let resolved_by_analysis: Option<String> = row.get(11).map_err(storage)?;
    let resolved_at: Option<String> = row.get(13).map_err(storage)?;

    let resolution = match (resolved_by_commit, resolved_by_analysis, resolved_at) {
        (Some(commit), Some(analysis), Some(at)) => Some(IssueResolution {
            resolved_by_pr: row.get(9).map_err(storage)?,
            resolved_by_commit: commit,
            resolved_by_analysis: AnalysisId::new(analysis).map_err(storage)?,
            resolved_by: row.get(12).map_err(storage)?,
            resolved_at: from_rfc3339(&at).map_err(storage)?,
        }),
        _ => None,
    };
    Ok(CodeAnalysisIssue {
        id: IssueId::new(id).map_err(storage)?,
        analysis_id: AnalysisId::new(analysis_id).map_err(storage)?,
        category: decode_enum(&category).map_err(storage)?,
        severity: decode_enum(&severity).map_err(storage)?,
        file_path: row.get(4).map_err(storage)?,
        line: row.get(5).map_err(storage)?,
        title: row.get(6).map_err(storage)?,
        suggested_fix: row.get(7).map_err(storage)?,
        vcs_author: row.get(8).map_err(storage)?,
        resolution,
    })
}
