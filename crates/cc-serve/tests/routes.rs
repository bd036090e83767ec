use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use cc_core::collaborators::{AiClient, Collaborators, VcsClient, VectorIndex};
use cc_core::config::CodeCrowConfig;
use cc_core::error::CollaboratorError;
use cc_core::types::{
    AiIssue, ChangedFile, Chunk, ContextHit, IndexScope, JobKind, JobTrigger, NewJob,
    ProjectBinding, ProjectId, PullRequestMeta, VcsProvider,
};
use cc_core::RequestContext;
use cc_db::DbProvider;
use cc_events::bus::EventBus;
use cc_events::types::EventSource;
use cc_serve::housekeeping::sweep;
use cc_serve::AppState;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const REPO: &str = "acme/api";
const SECRET: &str = "hook-secret";

struct QuietVcs;

#[async_trait]
impl VcsClient for QuietVcs {
    async fn get_pr_diff(
        &self,
        _project: &ProjectBinding,
        _pr_number: i64,
    ) -> Result<String, CollaboratorError> {
        Ok(String::new())
    }

    async fn get_commit_diff(
        &self,
        _project: &ProjectBinding,
        _commit: &str,
    ) -> Result<String, CollaboratorError> {
        Ok(String::new())
    }

    async fn get_pull_request_meta(
        &self,
        _project: &ProjectBinding,
        pr_number: i64,
    ) -> Result<PullRequestMeta, CollaboratorError> {
        Ok(PullRequestMeta {
            number: pr_number,
            title: None,
            source_branch: "feature/login".to_string(),
            target_branch: "main".to_string(),
            head_commit: "abc123".to_string(),
        })
    }

    async fn post_comment(
        &self,
        _project: &ProjectBinding,
        _pr_number: i64,
        _body: &str,
    ) -> Result<String, CollaboratorError> {
        Ok("comment-1".to_string())
    }

    async fn update_comment(
        &self,
        _project: &ProjectBinding,
        _pr_number: i64,
        _comment_id: &str,
        _body: &str,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn branch_head(
        &self,
        _project: &ProjectBinding,
        _branch: &str,
    ) -> Result<String, CollaboratorError> {
        Ok("abc123".to_string())
    }

    async fn list_files(
        &self,
        _project: &ProjectBinding,
        _commit: &str,
    ) -> Result<Vec<String>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn compare(
        &self,
        _project: &ProjectBinding,
        _base: &str,
        _head: &str,
    ) -> Result<Vec<ChangedFile>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn get_file_content(
        &self,
        _project: &ProjectBinding,
        _path: &str,
        _commit: &str,
    ) -> Result<Option<String>, CollaboratorError> {
        Ok(None)
    }
}

struct QuietAi;

#[async_trait]
impl AiClient for QuietAi {
    async fn run_analysis(
        &self,
        _diff: &str,
        _context: &[ContextHit],
    ) -> Result<Vec<AiIssue>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn summarize(&self, _diff: &str) -> Result<String, CollaboratorError> {
        Ok("summary".to_string())
    }

    async fn ask(
        &self,
        _question: &str,
        _diff: &str,
        _context: &[ContextHit],
    ) -> Result<String, CollaboratorError> {
        Ok("answer".to_string())
    }
}

struct EmptyIndex;

#[async_trait]
impl VectorIndex for EmptyIndex {
    async fn index_chunks(
        &self,
        _scope: &IndexScope,
        _chunks: &[Chunk],
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn query(
        &self,
        _scope: &IndexScope,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<ContextHit>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn delete_scope(&self, _scope: &IndexScope) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

fn setup(secret: Option<&str>) -> (TempDir, AppState) {
    let mut config = CodeCrowConfig::default();
    config.server.webhook_secret = secret.map(ToString::to_string);
    setup_with(config)
}

fn setup_with(mut config: CodeCrowConfig) -> (TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codecrow.db");
    let provider = Arc::new(DbProvider::new(path.to_str().unwrap(), EventBus::new(64)));
    provider.migrate().unwrap();
    config.ai.max_attempts = 1;
    config.vcs.max_attempts = 1;
    let collaborators = Collaborators::new(Arc::new(QuietAi), Arc::new(EmptyIndex))
        .with_vcs(VcsProvider::Github, Arc::new(QuietVcs));
    let state = AppState::new(provider, collaborators, Arc::new(config));
    (dir, state)
}

fn app(state: &AppState) -> Router {
    cc_serve::app(state.clone())
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = app(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn workspace_id() -> String {
    cc_core::types::WorkspaceId::generate().to_string()
}

async fn register(state: &AppState, workspace_id: &str) -> Value {
    let (status, body) = send(
        state,
        post_json(
            "/api/projects",
            &json!({
                "workspace_id": workspace_id,
                "provider": "Github",
                "repo_full_name": REPO,
                "default_branch": "main"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

fn pull_request_payload() -> Vec<u8> {
    json!({
        "action": "opened",
        "repository": { "full_name": REPO },
        "pull_request": {
            "number": 7,
            "head": { "ref": "feature/login", "sha": "abc123" },
            "base": { "ref": "main", "sha": "def456" }
        },
        "sender": { "login": "octocat" }
    })
    .to_string()
    .into_bytes()
}

fn webhook(payload: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhooks/github")
        .header("x-github-event", "pull_request")
        .header("x-github-delivery", "delivery-1");
    if let Some(signature) = signature {
        builder = builder.header("x-hub-signature-256", signature);
    }
    builder.body(Body::from(payload)).unwrap()
}

fn sign(payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn test_register_and_fetch_project() {
    let (_dir, state) = setup(None);
    let created = register(&state, &workspace_id()).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = send(&state, get(&format!("/api/projects/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["repo_full_name"], REPO);
    assert_eq!(body["default_branch"], "main");

    let (status, body) = send(
        &state,
        get(&format!("/api/projects/lookup?provider=github&repo={REPO}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);
}

#[tokio::test]
async fn test_missing_project_returns_envelope() {
    let (_dir, state) = setup(None);
    let unknown = cc_core::types::ProjectId::generate();
    let (status, body) = send(&state, get(&format!("/api/projects/{unknown}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body) = send(&state, get("/api/projects/not-an-id")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn test_correlation_header_is_echoed() {
    let (_dir, state) = setup(None);
    let request = Request::builder()
        .uri("/api/events")
        .header("x-correlation-id", "corr-abc")
        .body(Body::empty())
        .unwrap();
    let response = app(&state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "corr-abc"
    );
}

#[tokio::test]
async fn test_webhook_for_unbound_repository_is_ignored() {
    let (_dir, state) = setup(None);
    let (status, body) = send(&state, webhook(pull_request_payload(), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["reason"], "no project bound to repository");
}

#[tokio::test]
async fn test_webhook_accepts_bound_pull_request() {
    let (_dir, state) = setup(None);
    register(&state, &workspace_id()).await;

    let (status, body) = send(&state, webhook(pull_request_payload(), None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    let job_id = body["job_id"].as_str().unwrap();

    let (status, job) = send(&state, get(&format!("/api/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["kind"], "PrAnalysis");
    assert_eq!(job["pr_number"], 7);

    let (status, page) = send(&state, get(&format!("/api/jobs/{job_id}/logs"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["job_id"], job_id);
}

#[tokio::test]
async fn test_webhook_event_outside_table_is_ignored() {
    let (_dir, state) = setup(None);
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/github")
        .header("x-github-event", "ping")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn test_webhook_rejects_malformed_payload() {
    let (_dir, state) = setup(None);
    let payload = json!({
        "action": "opened",
        "repository": { "full_name": REPO },
        "pull_request": { "head": { "ref": "feature/login", "sha": "abc" } }
    })
    .to_string()
    .into_bytes();
    let (status, body) = send(&state, webhook(payload, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
    assert_eq!(body["correlation_id"], "delivery-1");
}

#[tokio::test]
async fn test_webhook_signature_is_enforced_when_secret_set() {
    let (_dir, state) = setup(Some(SECRET));

    let (status, body) = send(&state, webhook(pull_request_payload(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let forged = Some("sha256=00ff".to_string());
    let (status, _) = send(&state, webhook(pull_request_payload(), forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let payload = pull_request_payload();
    let signature = Some(sign(&payload));
    let (status, body) = send(&state, webhook(payload, signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn test_unknown_provider_is_rejected() {
    let (_dir, state) = setup(None);
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/sourcehut")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_gate_management_flow() {
    let (_dir, state) = setup(None);
    let workspace = workspace_id();
    let project = register(&state, &workspace).await;
    let project_id = project["id"].as_str().unwrap();

    let (status, _) = send(&state, get(&format!("/api/projects/{project_id}/gate"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, gate) = send(
        &state,
        post_json(
            "/api/gates",
            &json!({
                "workspace_id": workspace,
                "project_id": null,
                "name": "Strict",
                "conditions": [{
                    "metric": "TotalIssues",
                    "severity": null,
                    "category": null,
                    "comparator": "Gt",
                    "threshold": 0
                }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let gate_id = gate["id"].as_str().unwrap();
    assert_eq!(gate["is_default"], false);

    let (status, gate) = send(
        &state,
        post_json(&format!("/api/gates/{gate_id}/default"), &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gate["is_default"], true);

    let (status, effective) =
        send(&state, get(&format!("/api/projects/{project_id}/gate"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(effective["id"], gate_id);

    let condition_id = gate["conditions"][0]["id"].as_str().unwrap();
    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/api/gates/{gate_id}/conditions/{condition_id}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "enabled": false }).to_string()))
        .unwrap();
    let (status, gate) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gate["conditions"][0]["enabled"], false);

    let (status, gates) = send(&state, get(&format!("/api/gates?workspace_id={workspace}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gates.as_array().unwrap().len(), 1);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/gates/{gate_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_events_record_state_changes() {
    let (_dir, state) = setup(None);
    register(&state, &workspace_id()).await;

    let (status, events) = send(&state, get("/api/events")).await;
    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["seq"], 1);

    let (status, events) = send(&state, get("/api/events?after=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(events.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_branch_state_for_unindexed_branch_is_empty() {
    let (_dir, state) = setup(None);
    let project = register(&state, &workspace_id()).await;
    let project_id = project["id"].as_str().unwrap();

    let (status, body) = send(
        &state,
        get(&format!("/api/projects/{project_id}/rag?branch=main")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["index"], Value::Null);
    assert!(body["deltas"].as_array().unwrap().is_empty());

    let missing = cc_core::types::DeltaId::generate();
    let (status, _) = send(&state, get(&format!("/api/rag/deltas/{missing}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (_dir, state) = setup(None);
    let (status, body) = send(&state, get("/api/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/webhooks/{provider}"].is_object());
}

#[tokio::test]
async fn test_sweep_fails_jobs_past_deadline() {
    let mut config = CodeCrowConfig::default();
    config.housekeeping.job_deadline_secs = Some(0);
    let (_dir, state) = setup_with(config);
    let project = register(&state, &workspace_id()).await;
    let project_id = ProjectId::new(project["id"].as_str().unwrap().to_string()).unwrap();

    let ctx = RequestContext::new(EventSource::Webhook, None);
    let codecrow = cc_serve::build_codecrow(&state).unwrap();
    let job = codecrow
        .jobs()
        .create(
            &ctx,
            NewJob {
                project_id,
                kind: JobKind::PrAnalysis,
                trigger: JobTrigger::Webhook,
                pr_number: Some(7),
                branch: Some("feature/login".to_string()),
                commit_hash: Some("abc123".to_string()),
            },
        )
        .unwrap();
    codecrow.jobs().queue(&ctx, &job.id).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = sweep(&state, EventSource::Scheduler).await.unwrap();
    assert_eq!(report.jobs_failed, 1);

    let (status, body) = send(&state, get(&format!("/api/jobs/{}", job.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Failed");
    assert_eq!(body["error_message"], "abandoned");

    let (status, page) = send(&state, get(&format!("/api/jobs/{}/logs", job.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["is_complete"], true);

    let again = sweep(&state, EventSource::Scheduler).await.unwrap();
    assert_eq!(again.jobs_failed, 0);
}

#[tokio::test]
async fn test_sweep_leaves_recent_jobs_running() {
    let (_dir, state) = setup(None);
    let project = register(&state, &workspace_id()).await;
    let project_id = ProjectId::new(project["id"].as_str().unwrap().to_string()).unwrap();

    let ctx = RequestContext::new(EventSource::Webhook, None);
    let codecrow = cc_serve::build_codecrow(&state).unwrap();
    let job = codecrow
        .jobs()
        .create(
            &ctx,
            NewJob {
                project_id,
                kind: JobKind::RagIndex,
                trigger: JobTrigger::Webhook,
                pr_number: None,
                branch: Some("main".to_string()),
                commit_hash: Some("abc123".to_string()),
            },
        )
        .unwrap();
    codecrow.jobs().start(&ctx, &job.id).unwrap();

    let report = sweep(&state, EventSource::Scheduler).await.unwrap();
    assert_eq!(report.jobs_failed, 0);
    let job = codecrow.jobs().get(&job.id).unwrap().unwrap();
    assert!(!job.status.is_terminal());
}
