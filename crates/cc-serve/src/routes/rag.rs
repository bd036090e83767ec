use crate::middleware::correlation::CorrelationId;
use crate::routes::error::map_error;
use crate::routes::projects::parse_project_id;
use crate::{build_codecrow, AppState};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use cc_core::error::{CodeCrowError, ProjectError, RagError};
use cc_core::types::{BranchIndexState, ContextHit, DeltaId, ProjectBinding, RagDeltaIndex};
use cc_core::RequestContext;
use cc_events::types::EventSource;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct BranchQuery {
    branch: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ContextQueryInput {
    pub branch: String,
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BranchDeleted {
    pub removed: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/projects/{id}/rag",
            get(branch_state).delete(delete_branch),
        )
        .route("/projects/{id}/rag/query", post(query_context))
        .route("/rag/deltas/{id}", get(get_delta))
        .with_state(state)
}

fn load_project(state: &AppState, id: String) -> Result<ProjectBinding, CodeCrowError> {
    let project_id = parse_project_id(id)?;
    build_codecrow(state)?
        .projects()
        .get(&project_id)?
        .ok_or_else(|| ProjectError::NotFound.into())
}

/// Base index row plus every delta recorded for the branch.
#[utoipa::path(
    get,
    path = "/api/projects/{id}/rag",
    params(("id" = String, Path, description = "Project ID"), BranchQuery),
    responses((status = 200, body = BranchIndexState))
)]
pub(crate) async fn branch_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BranchQuery>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let project_id = match parse_project_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow.rag().branch_state(&project_id, &query.branch) {
        Ok(branch_state) => Json(branch_state).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/rag/deltas/{id}",
    params(("id" = String, Path, description = "Delta ID")),
    responses((status = 200, body = RagDeltaIndex))
)]
pub(crate) async fn get_delta(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    // A malformed id cannot name a stored delta.
    let Ok(delta_id) = DeltaId::new(id) else {
        return map_error(&CodeCrowError::from(RagError::DeltaNotFound), None).into_response();
    };
    match codecrow.rag().get_delta(&delta_id) {
        Ok(Some(delta)) => Json(delta).into_response(),
        Ok(None) => map_error(&CodeCrowError::from(RagError::DeltaNotFound), None).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

/// Context hits as an analysis of `branch` would see them.
#[utoipa::path(
    post,
    path = "/api/projects/{id}/rag/query",
    params(("id" = String, Path, description = "Project ID")),
    request_body = ContextQueryInput,
    responses((status = 200, body = Vec<ContextHit>))
)]
pub(crate) async fn query_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<ContextQueryInput>,
) -> Response {
    let project = match load_project(&state, id) {
        Ok(project) => project,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let limit = input.limit.unwrap_or(state.config.rag.context_limit);
    match state
        .orchestrator
        .indexer()
        .query_context(&project, &input.branch, &input.query, limit)
        .await
    {
        Ok(hits) => Json(hits).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

/// Drops a branch's vectors, tombstones and deltas. Deleting an unknown
/// branch removes nothing and succeeds.
#[utoipa::path(
    delete,
    path = "/api/projects/{id}/rag",
    params(("id" = String, Path, description = "Project ID"), BranchQuery),
    responses((status = 200, body = BranchDeleted))
)]
pub(crate) async fn delete_branch(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    Query(query): Query<BranchQuery>,
) -> Response {
    let project = match load_project(&state, id) {
        Ok(project) => project,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match state
        .orchestrator
        .indexer()
        .delete_branch_index(&ctx, &project.id, &query.branch)
        .await
    {
        Ok(removed) => Json(BranchDeleted { removed }).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}
