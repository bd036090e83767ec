use crate::error::ProjectError;
use crate::types::{ProjectBinding, ProjectId, RegisterProjectInput, VcsProvider};

pub trait ProjectRepository {
    fn register(&self, input: RegisterProjectInput) -> Result<ProjectBinding, ProjectError>;
    fn get(&self, id: &ProjectId) -> Result<Option<ProjectBinding>, ProjectError>;
    fn find_by_repo(
        &self,
        provider: VcsProvider,
        repo_full_name: &str,
    ) -> Result<Option<ProjectBinding>, ProjectError>;
    fn set_active(&self, id: &ProjectId, active: bool) -> Result<ProjectBinding, ProjectError>;
}
