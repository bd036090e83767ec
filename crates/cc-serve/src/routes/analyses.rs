use crate::middleware::correlation::CorrelationId;
use crate::routes::error::map_error;
use crate::routes::projects::parse_project_id;
use crate::{build_codecrow, AppState};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use cc_core::error::{AnalysisError, CodeCrowError};
use cc_core::types::{AnalysisId, CodeAnalysis, CodeAnalysisIssue, GateEvaluation};
use cc_core::RequestContext;
use cc_events::types::EventSource;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/analyses/{id}", get(get_analysis))
        .route("/analyses/{id}/reject", post(reject_analysis))
        .route("/analyses/{id}/evaluation", get(reevaluate))
        .route("/projects/{id}/pulls/{pr}/analysis", get(current_for_pr))
        .route("/projects/{id}/pulls/{pr}/issues", get(unresolved_for_pr))
        .with_state(state)
}

fn parse_analysis_id(id: String) -> Result<AnalysisId, CodeCrowError> {
    AnalysisId::new(id).map_err(|err| {
        CodeCrowError::from(AnalysisError::InvalidInput {
            message: err.to_string(),
        })
    })
}

#[utoipa::path(
    get,
    path = "/api/analyses/{id}",
    params(("id" = String, Path, description = "Analysis ID")),
    responses((status = 200, body = CodeAnalysis))
)]
pub(crate) async fn get_analysis(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let analysis_id = match parse_analysis_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow.analyses().get(&analysis_id) {
        Ok(Some(analysis)) => Json(analysis).into_response(),
        Ok(None) => {
            map_error(&CodeCrowError::from(AnalysisError::NotFound), None).into_response()
        }
        Err(err) => map_error(&err, None).into_response(),
    }
}

/// Marks a bad result so later deliveries of the same change re-run the AI.
#[utoipa::path(
    post,
    path = "/api/analyses/{id}/reject",
    params(("id" = String, Path, description = "Analysis ID")),
    responses((status = 200, body = CodeAnalysis))
)]
pub(crate) async fn reject_analysis(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let analysis_id = match parse_analysis_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match codecrow.analyses().reject(&ctx, &analysis_id) {
        Ok(analysis) => Json(analysis).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/analyses/{id}/evaluation",
    params(("id" = String, Path, description = "Analysis ID")),
    responses((status = 200, body = GateEvaluation))
)]
pub(crate) async fn reevaluate(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let analysis_id = match parse_analysis_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow.analyses().reevaluate(&analysis_id) {
        Ok(evaluation) => Json(evaluation).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}/pulls/{pr}/analysis",
    params(
        ("id" = String, Path, description = "Project ID"),
        ("pr" = i64, Path, description = "Pull request number")
    ),
    responses((status = 200, body = CodeAnalysis))
)]
pub(crate) async fn current_for_pr(
    State(state): State<AppState>,
    Path((id, pr)): Path<(String, i64)>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let project_id = match parse_project_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow.analyses().current_for_pr(&project_id, pr) {
        Ok(Some(analysis)) => Json(analysis).into_response(),
        Ok(None) => {
            map_error(&CodeCrowError::from(AnalysisError::NotFound), None).into_response()
        }
        Err(err) => map_error(&err, None).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/projects/{id}/pulls/{pr}/issues",
    params(
        ("id" = String, Path, description = "Project ID"),
        ("pr" = i64, Path, description = "Pull request number")
    ),
    responses((status = 200, body = Vec<CodeAnalysisIssue>))
)]
pub(crate) async fn unresolved_for_pr(
    State(state): State<AppState>,
    Path((id, pr)): Path<(String, i64)>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let project_id = match parse_project_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow.analyses().unresolved_for_pr(&project_id, pr) {
        Ok(issues) => Json(issues).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}
