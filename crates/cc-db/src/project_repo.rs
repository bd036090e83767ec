use crate::util::{
    decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, is_constraint_violation, now,
    to_rfc3339,
};
use cc_core::error::ProjectError;
use cc_core::projects::ProjectRepository;
use cc_core::types::{ProjectBinding, ProjectId, RegisterProjectInput, VcsProvider, WorkspaceId};
use rusqlite::{Connection, Row, params};

const PROJECT_COLUMNS: &str = "id, workspace_id, provider, repo_full_name, active, default_branch, branch_patterns_json, pr_analysis_enabled, branch_analysis_enabled, rag_enabled, commands_enabled, created_at";

const DEFAULT_BRANCH: &str = "main";

pub struct ProjectRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> ProjectRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_one(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<ProjectBinding>, ProjectError> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE {clause}");
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt.query(params).map_err(storage)?;
        match rows.next().map_err(storage)? {
            Some(row) => Ok(Some(map_project_row(row)?)),
            None => Ok(None),
        }
    }
}

fn storage(err: impl std::fmt::Display) -> ProjectError {
    ProjectError::Storage {
        message: err.to_string(),
    }
}

impl<'a> ProjectRepository for ProjectRepo<'a> {
    fn register(&self, input: RegisterProjectInput) -> Result<ProjectBinding, ProjectError> {
        let project = ProjectBinding {
            id: ProjectId::generate(),
            workspace_id: input.workspace_id,
            provider: input.provider,
            repo_full_name: input.repo_full_name.trim().to_string(),
            active: true,
            default_branch: input
                .default_branch
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            branch_patterns: input.branch_patterns,
            pr_analysis_enabled: input.pr_analysis_enabled.unwrap_or(true),
            branch_analysis_enabled: input.branch_analysis_enabled.unwrap_or(true),
            rag_enabled: input.rag_enabled.unwrap_or(false),
            commands_enabled: input.commands_enabled.unwrap_or(true),
            created_at: now(),
        };
        let sql = format!(
            "INSERT INTO projects ({PROJECT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        );
        let result = self.conn.execute(
            &sql,
            params![
                project.id.as_str(),
                project.workspace_id.as_str(),
                encode_enum(&project.provider).map_err(storage)?,
                project.repo_full_name,
                project.active,
                project.default_branch,
                encode_json(&project.branch_patterns).map_err(storage)?,
                project.pr_analysis_enabled,
                project.branch_analysis_enabled,
                project.rag_enabled,
                project.commands_enabled,
                to_rfc3339(&project.created_at),
            ],
        );
        match result {
            Ok(_) => Ok(project),
            Err(err) if is_constraint_violation(&err) => Err(ProjectError::AlreadyBound),
            Err(err) => Err(storage(err)),
        }
    }

    fn get(&self, id: &ProjectId) -> Result<Option<ProjectBinding>, ProjectError> {
        self.query_one("id = ?1", [id.as_str()])
    }

    fn find_by_repo(
        &self,
        provider: VcsProvider,
        repo_full_name: &str,
    ) -> Result<Option<ProjectBinding>, ProjectError> {
        let provider = encode_enum(&provider).map_err(storage)?;
        self.query_one(
            "provider = ?1 AND repo_full_name = ?2",
            params![provider, repo_full_name],
        )
    }

    fn set_active(&self, id: &ProjectId, active: bool) -> Result<ProjectBinding, ProjectError> {
        let affected = self
            .conn
            .execute(
                "UPDATE projects SET active = ?1 WHERE id = ?2",
                params![active, id.as_str()],
            )
            .map_err(storage)?;
        if affected == 0 {
            return Err(ProjectError::NotFound);
        }
        self.get(id)?.ok_or(ProjectError::NotFound)
    }
}

fn map_project_row(row: &Row<'_>) -> Result<ProjectBinding, ProjectError> {
    let id: String = row.get(0).map_err(storage)?;
    let workspace_id: String = row.get(1).map_err(storage)?;
    let provider: String = row.get(2).map_err(storage)?;
    let patterns: String = row.get(6).map_err(storage)?;
    let created_at: String = row.get(11).map_err(storage)?;
    Ok(ProjectBinding {
        id: ProjectId::new(id).map_err(storage)?,
        workspace_id: WorkspaceId::new(workspace_id).map_err(storage)?,
        provider: decode_enum(&provider).map_err(storage)?,
        repo_full_name: row.get(3).map_err(storage)?,
        active: row.get(4).map_err(storage)?,
        default_branch: row.get(5).map_err(storage)?,
        branch_patterns: decode_json(&patterns).map_err(storage)?,
        pr_analysis_enabled: row.get(7).map_err(storage)?,
        branch_analysis_enabled: row.get(8).map_err(storage)?,
        rag_enabled: row.get(9).map_err(storage)?,
        commands_enabled: row.get(10).map_err(storage)?,
        created_at: from_rfc3339(&created_at).map_err(storage)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;

    fn input(repo: &str) -> RegisterProjectInput {
        RegisterProjectInput {
            workspace_id: WorkspaceId::generate(),
            provider: VcsProvider::Github,
            repo_full_name: repo.to_string(),
            default_branch: None,
            branch_patterns: vec!["main".to_string(), "release/**".to_string()],
            pr_analysis_enabled: None,
            branch_analysis_enabled: Some(false),
            rag_enabled: None,
            commands_enabled: None,
        }
    }

    #[test]
    fn test_register_applies_defaults() {
        let conn = with_test_db().unwrap();
        let repo = ProjectRepo::new(&conn);
        let project = repo.register(input("acme/api")).unwrap();
        assert!(project.active);
        assert_eq!(project.default_branch, "main");
        assert!(project.pr_analysis_enabled);
        assert!(!project.branch_analysis_enabled);
        assert!(!project.rag_enabled);
        assert!(project.commands_enabled);

        let loaded = repo.get(&project.id).unwrap().unwrap();
        assert_eq!(loaded, project);
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let conn = with_test_db().unwrap();
        let repo = ProjectRepo::new(&conn);
        repo.register(input("acme/api")).unwrap();
        let err = repo.register(input("acme/api")).unwrap_err();
        assert!(matches!(err, ProjectError::AlreadyBound));
    }

    #[test]
    fn test_find_by_repo_matches_provider_and_ignores_case() {
        let conn = with_test_db().unwrap();
        let repo = ProjectRepo::new(&conn);
        let project = repo.register(input("Acme/API")).unwrap();

        let found = repo
            .find_by_repo(VcsProvider::Github, "acme/api")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, project.id);
        assert!(
            repo.find_by_repo(VcsProvider::Gitlab, "acme/api")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_set_active() {
        let conn = with_test_db().unwrap();
        let repo = ProjectRepo::new(&conn);
        let project = repo.register(input("acme/api")).unwrap();
        let inactive = repo.set_active(&project.id, false).unwrap();
        assert!(!inactive.active);
        assert!(matches!(
            repo.set_active(&ProjectId::generate(), true),
            Err(ProjectError::NotFound)
        ));
    }
}
