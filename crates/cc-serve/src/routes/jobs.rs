use crate::middleware::correlation::CorrelationId;
use crate::routes::error::map_error;
use crate::{build_codecrow, AppState};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use cc_core::error::{CodeCrowError, JobError};
use cc_core::types::{Job, JobFilter, JobId, JobLogPage, JobStatus, ProjectId};
use cc_core::RequestContext;
use cc_events::types::EventSource;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct JobListQuery {
    project_id: Option<String>,
    pr_number: Option<i64>,
    status: Option<JobStatus>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct LogsQuery {
    /// Last sequence the caller has seen; omitted means from the start.
    after: Option<i64>,
    limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/logs", get(job_logs))
        .route("/jobs/{id}/logs/stream", get(stream_logs))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .with_state(state)
}

pub(crate) fn parse_job_id(id: String) -> Result<JobId, CodeCrowError> {
    JobId::new(id).map_err(|err| {
        CodeCrowError::from(JobError::InvalidInput {
            message: err.to_string(),
        })
    })
}

#[utoipa::path(
    get,
    path = "/api/jobs",
    params(JobListQuery),
    responses((status = 200, body = Vec<Job>))
)]
pub(crate) async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let project_id = match query.project_id.map(ProjectId::new).transpose() {
        Ok(value) => value,
        Err(err) => {
            let err = CodeCrowError::from(JobError::InvalidInput {
                message: err.to_string(),
            });
            return map_error(&err, None).into_response();
        }
    };
    let filter = JobFilter {
        project_id,
        pr_number: query.pr_number,
        status: query.status.map(|status| vec![status]),
        limit: query.limit,
    };
    match codecrow.jobs().list(&filter) {
        Ok(jobs) => Json(jobs).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses((status = 200, body = Job))
)]
pub(crate) async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let job_id = match parse_job_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow.jobs().get(&job_id) {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => map_error(&CodeCrowError::from(JobError::NotFound), None).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

/// One poll of the job's log stream. Pass the returned `latest_sequence`
/// back as `after` to continue without re-reading history.
#[utoipa::path(
    get,
    path = "/api/jobs/{id}/logs",
    params(("id" = String, Path, description = "Job ID"), LogsQuery),
    responses((status = 200, body = JobLogPage))
)]
pub(crate) async fn job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, None).into_response(),
    };
    let job_id = match parse_job_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    match codecrow
        .jobs()
        .logs_since(&job_id, query.after.unwrap_or(0), query.limit)
    {
        Ok(page) => Json(page).into_response(),
        Err(err) => map_error(&err, None).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/jobs/{id}/logs/stream",
    params(("id" = String, Path, description = "Job ID"), LogsQuery),
    responses((status = 200, description = "Server-sent log entries until the job finishes"))
)]
pub(crate) async fn stream_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let job_id = match parse_job_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, None).into_response(),
    };
    crate::sse::job_logs(state, job_id, query.after.unwrap_or(0)).await
}

#[utoipa::path(
    post,
    path = "/api/jobs/{id}/cancel",
    params(("id" = String, Path, description = "Job ID")),
    responses((status = 200, body = Job))
)]
pub(crate) async fn cancel_job(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
) -> Response {
    let codecrow = match build_codecrow(&state) {
        Ok(codecrow) => codecrow,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let job_id = match parse_job_id(id) {
        Ok(value) => value,
        Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    match codecrow.jobs().cancel(&ctx, &job_id) {
        Ok(job) => Json(job).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}
