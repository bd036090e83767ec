use utoipa::OpenApi;

use crate::routes::events::EventsQuery;
use crate::routes::gates::{GateListQuery, SetConditionInput};
use crate::routes::jobs::{JobListQuery, LogsQuery};
use crate::routes::projects::{ProjectLookupQuery, SetActiveInput};
use crate::routes::rag::{BranchDeleted, BranchQuery, ContextQueryInput};
use crate::routes::webhooks::WebhookAck;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use cc_core::types::{
    AnalysisId, AnalysisResult, AnalysisStatus, BranchIndexState, CodeAnalysis,
    CodeAnalysisIssue, Comparator, ConditionId, ConditionInput, ConditionOutcome, ContextHit,
    CreateGateInput, DeltaId, DeltaStatus, GateEvaluation, GateId, GateMetric, IssueCategory,
    IssueId, IssueResolution, Job, JobId, JobKind, JobLogEntry, JobLogPage, JobStatus, JobTrigger,
    LogLevel, ProjectBinding, ProjectId, QualityGate, QualityGateCondition, RagBranchIndex,
    RagDeltaIndex, RegisterProjectInput, Severity, SeverityCounts, VcsProvider, WorkspaceId,
};
use cc_events::types::{EventRecord, EventSource};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::webhooks::receive,
        crate::routes::jobs::list_jobs,
        crate::routes::jobs::get_job,
        crate::routes::jobs::job_logs,
        crate::routes::jobs::stream_logs,
        crate::routes::jobs::cancel_job,
        crate::routes::analyses::get_analysis,
        crate::routes::analyses::reject_analysis,
        crate::routes::analyses::reevaluate,
        crate::routes::analyses::current_for_pr,
        crate::routes::analyses::unresolved_for_pr,
        crate::routes::gates::add_gate,
        crate::routes::gates::list_gates,
        crate::routes::gates::get_gate,
        crate::routes::gates::remove_gate,
        crate::routes::gates::set_default,
        crate::routes::gates::set_condition_enabled,
        crate::routes::gates::effective_gate,
        crate::routes::projects::register_project,
        crate::routes::projects::get_project,
        crate::routes::projects::lookup_project,
        crate::routes::projects::set_active,
        crate::routes::rag::branch_state,
        crate::routes::rag::get_delta,
        crate::routes::rag::query_context,
        crate::routes::rag::delete_branch,
        crate::routes::events::list_events,
        crate::routes::events::subscribe,
    ),
    components(schemas(
        WebhookAck,
        JobListQuery,
        LogsQuery,
        GateListQuery,
        SetConditionInput,
        ProjectLookupQuery,
        SetActiveInput,
        BranchQuery,
        ContextQueryInput,
        BranchDeleted,
        EventsQuery,
        Job,
        JobLogEntry,
        JobLogPage,
        JobStatus,
        JobKind,
        JobTrigger,
        LogLevel,
        CodeAnalysis,
        CodeAnalysisIssue,
        IssueResolution,
        SeverityCounts,
        AnalysisResult,
        AnalysisStatus,
        Severity,
        IssueCategory,
        QualityGate,
        QualityGateCondition,
        CreateGateInput,
        ConditionInput,
        ConditionOutcome,
        GateEvaluation,
        GateMetric,
        Comparator,
        ProjectBinding,
        RegisterProjectInput,
        VcsProvider,
        BranchIndexState,
        RagBranchIndex,
        RagDeltaIndex,
        DeltaStatus,
        ContextHit,
        EventRecord,
        EventSource,
        WorkspaceId,
        ProjectId,
        JobId,
        AnalysisId,
        IssueId,
        GateId,
        ConditionId,
        DeltaId,
    ))
)]
struct ApiDoc;

pub fn generate_spec() -> String {
    ApiDoc::openapi()
        .to_pretty_json()
        .unwrap_or_else(|_| "{}".to_string())
}

pub fn router() -> Router {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
