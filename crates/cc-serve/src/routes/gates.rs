use crate::middleware::correlation::CorrelationId;
use crate::routes::error::map_error;
use crate::routes::projects::parse_project_id;
use crate::{build_codecrow, AppState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use cc_core::error::{CodeCrowError, GateError, ProjectError};
use cc_core::types::{ConditionId, CreateGateInput, GateId, QualityGate, WorkspaceId};
use cc_core::RequestContext;
use cc_events::types::EventSource;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct GateListQuery {
    workspace_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetConditionInput {
    pub enabled: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/gates", post(add_gate).get(list_gates))
        .route("/gates/{id}", get(get_gate).delete(remove_gate))
        .route("/gates/{id}/default", post(set_default))
        .route(
            "/gates/{id}/conditions/{condition_id}",
            patch(set_condition_enabled),
        )
        .route("/projects/{id}/gate", get(effective_gate))
        .with_state(state)
}

fn invalid(message: impl ToString) -> CodeCrowError {
    CodeCrowError::from(GateError::InvalidInput {
        message: message.to_string(),
    })
}

fn parse_gate_id(id: String) -> Result<GateId, CodeCrowError> {
    GateId::new(id).map_err(invalid)
}

#[utoipa::path(
    post,
    path = "/api/gates",
    request_body = CreateGateInput,
    responses((status = 201, body = QualityGate))
)]
pub(crate) async fn add_gate(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(input): Json<CreateGateInput>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match codecrow.gates().create(&ctx, input) {
        Ok(gate) => (StatusCode::CREATED, Json(gate)).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/gates",
    params(GateListQuery),
    responses((status = 200, body = Vec<QualityGate>))
)]
pub(crate) async fn list_gates(
    State(state): State<AppState>,
    Query(query): Query<GateListQuery>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let workspace_id = match WorkspaceId::new(query.workspace_id) {
        Ok(value) => value,
        Err(err) => return map_error(&invalid(err), None).into_response(),
    };
    match codecrow.gates().list(&workspace_id) {
        Ok(gates) => Json(gates).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/gates/{id}",
    params(("id" = String, Path, description = "Gate ID")),
    responses((status = 200, body = QualityGate))
)]
pub(crate) async fn get_gate(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let gate_id = match parse_gate_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow.gates().get(&gate_id) {
        Ok(Some(gate)) => Json(gate).into_response(),
        Ok(None) => map_error(&CodeCrowError::from(GateError::GateNotFound), None).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/api/gates/{id}",
    params(("id" = String, Path, description = "Gate ID")),
    responses((status = 204))
)]
pub(crate) async fn remove_gate(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let gate_id = match parse_gate_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match codecrow.gates().remove(&ctx, &gate_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}

/// Makes the gate its workspace's default; the previous default is cleared.
#[utoipa::path(
    post,
    path = "/api/gates/{id}/default",
    params(("id" = String, Path, description = "Gate ID")),
    responses((status = 200, body = QualityGate))
)]
pub(crate) async fn set_default(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let gate_id = match parse_gate_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match codecrow.gates().set_default(&ctx, &gate_id) {
        Ok(gate) => Json(gate).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}

#[utoipa::path(
    patch,
    path = "/api/gates/{id}/conditions/{condition_id}",
    params(
        ("id" = String, Path, description = "Gate ID"),
        ("condition_id" = String, Path, description = "Condition ID")
    ),
    request_body = SetConditionInput,
    responses((status = 200, body = QualityGate))
)]
pub(crate) async fn set_condition_enabled(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path((id, condition_id)): Path<(String, String)>,
    Json(input): Json<SetConditionInput>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let gate_id = match parse_gate_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let condition_id = match ConditionId::new(condition_id) {
        Ok(value) => value,
        Err(err) => return map_error(&invalid(err), Some(correlation.0)).into_response(),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match codecrow
        .gates()
        .set_condition_enabled(&ctx, &gate_id, &condition_id, input.enabled)
    {
        Ok(gate) => Json(gate).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}

/// The gate that judges this project's analyses: its own gate, else the
/// workspace default.
#[utoipa::path(
    get,
    path = "/api/projects/{id}/gate",
    params(("id" = String, Path, description = "Project ID")),
    responses((status = 200, body = QualityGate))
)]
pub(crate) async fn effective_gate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let project_id = match parse_project_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let project = match codecrow.projects().get(&project_id) {
        Ok(Some(project)) => project,
        Ok(None) => {
            return map_error(&CodeCrowError::from(ProjectError::NotFound), None).into_response();
        }
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow.gates().effective(&project.workspace_id, &project.id) {
        Ok(Some(gate)) => Json(gate).into_response(),
        Ok(None) => map_error(&CodeCrowError::from(GateError::GateNotFound), None).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}
