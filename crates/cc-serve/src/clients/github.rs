//! GitHub REST client: diffs, PR metadata, comments and tree access.

use super::{check_status, transport_error};
use async_trait::async_trait;
use cc_core::collaborators::VcsClient;
use cc_core::error::CollaboratorError;
use cc_core::types::{ChangedFile, ProjectBinding, PullRequestMeta};
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

const SERVICE: &str = "github";
const JSON_MEDIA: &str = "application/vnd.github+json";
const DIFF_MEDIA: &str = "application/vnd.github.diff";
const RAW_MEDIA: &str = "application/vnd.github.raw+json";

#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct PullPayload {
    number: i64,
    title: Option<String>,
    head: RefPayload,
    base: RefPayload,
}

#[derive(Deserialize)]
struct RefPayload {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Deserialize)]
struct CommentPayload {
    id: i64,
}

#[derive(Deserialize)]
struct BranchPayload {
    commit: CommitPayload,
}

#[derive(Deserialize)]
struct CommitPayload {
    sha: String,
}

#[derive(Deserialize)]
struct TreePayload {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ComparePayload {
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Deserialize)]
struct CompareFile {
    filename: String,
    status: String,
    previous_filename: Option<String>,
}

impl GithubClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, project: &ProjectBinding, path: &str) -> String {
        format!("{}/repos/{}{path}", self.base_url, project.repo_full_name)
    }

    fn request(&self, builder: RequestBuilder, media: &str) -> RequestBuilder {
        let builder = builder
            .header(ACCEPT, media)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, CollaboratorError> {
        let response = builder
            .send()
            .await
            .map_err(|err| transport_error(SERVICE, &err))?;
        check_status(SERVICE, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CollaboratorError> {
        let response = self
            .send(self.request(self.http.get(url), JSON_MEDIA))
            .await?;
        response
            .json()
            .await
            .map_err(|err| transport_error(SERVICE, &err))
    }

    async fn get_text(&self, url: &str, media: &str) -> Result<String, CollaboratorError> {
        let response = self.send(self.request(self.http.get(url), media)).await?;
        response
            .text()
            .await
            .map_err(|err| transport_error(SERVICE, &err))
    }
}

#[async_trait]
impl VcsClient for GithubClient {
    async fn get_pr_diff(
        &self,
        project: &ProjectBinding,
        pr_number: i64,
    ) -> Result<String, CollaboratorError> {
        let url = self.url(project, &format!("/pulls/{pr_number}"));
        self.get_text(&url, DIFF_MEDIA).await
    }

    async fn get_commit_diff(
        &self,
        project: &ProjectBinding,
        commit: &str,
    ) -> Result<String, CollaboratorError> {
        let url = self.url(project, &format!("/commits/{commit}"));
        self.get_text(&url, DIFF_MEDIA).await
    }

    async fn get_pull_request_meta(
        &self,
        project: &ProjectBinding,
        pr_number: i64,
    ) -> Result<PullRequestMeta, CollaboratorError> {
        let url = self.url(project, &format!("/pulls/{pr_number}"));
        let pull: PullPayload = self.get_json(&url).await?;
        Ok(PullRequestMeta {
            number: pull.number,
            title: pull.title,
            source_branch: pull.head.name,
            target_branch: pull.base.name,
            head_commit: pull.head.sha,
        })
    }

    async fn post_comment(
        &self,
        project: &ProjectBinding,
        pr_number: i64,
        body: &str,
    ) -> Result<String, CollaboratorError> {
        let url = self.url(project, &format!("/issues/{pr_number}/comments"));
        let response = self
            .send(
                self.request(self.http.post(&url), JSON_MEDIA)
                    .json(&json!({ "body": body })),
            )
            .await?;
        let comment: CommentPayload = response
            .json()
            .await
            .map_err(|err| transport_error(SERVICE, &err))?;
        Ok(comment.id.to_string())
    }

    async fn update_comment(
        &self,
        project: &ProjectBinding,
        _pr_number: i64,
        comment_id: &str,
        body: &str,
    ) -> Result<(), CollaboratorError> {
        let url = self.url(project, &format!("/issues/comments/{comment_id}"));
        self.send(
            self.request(self.http.patch(&url), JSON_MEDIA)
                .json(&json!({ "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn branch_head(
        &self,
        project: &ProjectBinding,
        branch: &str,
    ) -> Result<String, CollaboratorError> {
        let url = self.url(project, &format!("/branches/{branch}"));
        let payload: BranchPayload = self.get_json(&url).await?;
        Ok(payload.commit.sha)
    }

    async fn list_files(
        &self,
        project: &ProjectBinding,
        commit: &str,
    ) -> Result<Vec<String>, CollaboratorError> {
        let url = self.url(project, &format!("/git/trees/{commit}?recursive=1"));
        let payload: TreePayload = self.get_json(&url).await?;
        if payload.truncated {
            tracing::warn!(repo = %project.repo_full_name, commit, "github tree listing truncated");
        }
        Ok(payload
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .collect())
    }

    async fn compare(
        &self,
        project: &ProjectBinding,
        base: &str,
        head: &str,
    ) -> Result<Vec<ChangedFile>, CollaboratorError> {
        let url = self.url(project, &format!("/compare/{base}...{head}"));
        let payload: ComparePayload = self.get_json(&url).await?;
        let mut changed = Vec::new();
        for file in payload.files {
            if let Some(previous) = file.previous_filename {
                changed.push(ChangedFile {
                    path: previous,
                    deleted: true,
                });
            }
            changed.push(ChangedFile {
                deleted: file.status == "removed",
                path: file.filename,
            });
        }
        Ok(changed)
    }

    async fn get_file_content(
        &self,
        project: &ProjectBinding,
        path: &str,
        commit: &str,
    ) -> Result<Option<String>, CollaboratorError> {
        let url = self.url(project, &format!("/contents/{path}?ref={commit}"));
        let response = self
            .request(self.http.get(&url), RAW_MEDIA)
            .send()
            .await
            .map_err(|err| transport_error(SERVICE, &err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(SERVICE, response).await?;
        response
            .text()
            .await
            .map(Some)
            .map_err(|err| transport_error(SERVICE, &err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_core::types::{ProjectId, VcsProvider, WorkspaceId};
    use chrono::Utc;

    fn project() -> ProjectBinding {
        ProjectBinding {
            id: ProjectId::generate(),
            workspace_id: WorkspaceId::generate(),
            provider: VcsProvider::Github,
            repo_full_name: "acme/api".to_string(),
            active: true,
            default_branch: "main".to_string(),
            branch_patterns: Vec::new(),
            pr_analysis_enabled: true,
            branch_analysis_enabled: true,
            rag_enabled: false,
            commands_enabled: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_url_joins_repo_path() {
        let client = GithubClient::new(reqwest::Client::new(), "https://api.github.com/", None);
        assert_eq!(
            client.url(&project(), "/pulls/7"),
            "https://api.github.com/repos/acme/api/pulls/7"
        );
    }

    #[test]
    fn test_pull_payload_maps_refs() {
        let pull: PullPayload = serde_json::from_str(
            r#"{"number":7,"title":"Fix","head":{"ref":"feature/x","sha":"abc"},"base":{"ref":"main","sha":"def"}}"#,
        )
        .unwrap();
        assert_eq!(pull.head.name, "feature/x");
        assert_eq!(pull.base.name, "main");
        assert_eq!(pull.head.sha, "abc");
    }
}
