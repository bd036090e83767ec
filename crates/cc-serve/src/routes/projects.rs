use crate::middleware::correlation::CorrelationId;
use crate::routes::error::map_error;
use crate::{build_codecrow, AppState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use cc_core::error::{CodeCrowError, ProjectError};
use cc_core::types::{ProjectBinding, ProjectId, RegisterProjectInput, VcsProvider};
use cc_core::RequestContext;
use cc_events::types::EventSource;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ProjectLookupQuery {
    /// `github`, `gitlab` or `bitbucket`.
    provider: String,
    repo: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetActiveInput {
    pub active: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/projects", post(register_project))
        .route("/projects/lookup", get(lookup_project))
        .route("/projects/{id}", get(get_project))
        .route("/projects/{id}/active", put(set_active))
        .with_state(state)
}

pub(crate) fn parse_project_id(id: String) -> Result<ProjectId, CodeCrowError> {
    ProjectId::new(id).map_err(|err| {
        CodeCrowError::from(ProjectError::InvalidInput {
            message: err.to_string(),
        })
    })
}

#[utoipa::path(
    post,
    path = "/api/projects",
    request_body = RegisterProjectInput,
    responses((status = 201, body = ProjectBinding))
)]
pub(crate) async fn register_project(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(input): Json<RegisterProjectInput>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match codecrow.projects().register(&ctx, input) {
        Ok(project) => (StatusCode::CREATED, Json(project)).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}",
    params(("id" = String, Path, description = "Project ID")),
    responses((status = 200, body = ProjectBinding))
)]
pub(crate) async fn get_project(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let project_id = match parse_project_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow.projects().get(&project_id) {
        Ok(Some(project)) => Json(project).into_response(),
        Ok(None) => map_error(&CodeCrowError::from(ProjectError::NotFound), None).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/projects/lookup",
    params(ProjectLookupQuery),
    responses((status = 200, body = ProjectBinding))
)]
pub(crate) async fn lookup_project(
    State(state): State<AppState>,
    Query(query): Query<ProjectLookupQuery>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let provider: VcsProvider = match query.provider.parse() {
        Ok(provider) => provider,
        Err(message) => {
            let err = CodeCrowError::from(ProjectError::InvalidInput { message });
            return map_error(&err, None).into_response();
        }
    };
    match codecrow.projects().find_by_repo(provider, &query.repo) {
        Ok(Some(project)) => Json(project).into_response(),
        Ok(None) => map_error(&CodeCrowError::from(ProjectError::NotFound), None).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

/// Inactive projects keep their history but every webhook for them is
/// ignored.
#[utoipa::path(
    put,
    path = "/api/projects/{id}/active",
    params(("id" = String, Path, description = "Project ID")),
    request_body = SetActiveInput,
    responses((status = 200, body = ProjectBinding))
)]
pub(crate) async fn set_active(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    Json(input): Json<SetActiveInput>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let project_id = match parse_project_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match codecrow.projects().set_active(&ctx, &project_id, input.active) {
        Ok(project) => Json(project).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}
