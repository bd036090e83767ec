use axum::http::StatusCode;
use axum::Json;
use cc_core::error::{
    AnalysisError, CodeCrowError, CollaboratorError, ConfigError, GateError, JobError, LockError,
    ProjectError, RagError, RateLimitError, WebhookError,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
    pub correlation_id: Option<String>,
}

pub fn map_error(
    err: &CodeCrowError,
    correlation_id: Option<String>,
) -> (StatusCode, Json<ErrorEnvelope>) {
    let (status, code, message) = match err {
        CodeCrowError::Job(job) => map_job_error(job),
        CodeCrowError::Analysis(analysis) => map_analysis_error(analysis),
        CodeCrowError::Gate(gate) => map_gate_error(gate),
        CodeCrowError::Lock(lock) => map_lock_error(lock),
        CodeCrowError::Rag(rag) => map_rag_error(rag),
        CodeCrowError::Project(project) => map_project_error(project),
        CodeCrowError::Webhook(webhook) => map_webhook_error(webhook),
        CodeCrowError::RateLimit(rate_limit) => map_rate_limit_error(rate_limit),
        CodeCrowError::Collaborator(collaborator) => map_collaborator_error(collaborator),
        CodeCrowError::Config(config) => map_config_error(config),
        CodeCrowError::Internal { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            message.clone(),
        ),
    };
    if status.is_server_error() {
        tracing::error!(code, %message, "request failed");
    }

    (
        status,
        Json(ErrorEnvelope {
            code,
            message,
            correlation_id,
        }),
    )
}

fn storage(message: &str) -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        message.to_string(),
    )
}

fn map_job_error(err: &JobError) -> (StatusCode, &'static str, String) {
    match err {
        JobError::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        JobError::InvalidTransition { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_state",
            err.to_string(),
        ),
        JobError::InvalidInput { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        JobError::Storage { message } => storage(message),
    }
}

fn map_analysis_error(err: &AnalysisError) -> (StatusCode, &'static str, String) {
    match err {
        AnalysisError::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        AnalysisError::Duplicate => (StatusCode::CONFLICT, "conflict", err.to_string()),
        AnalysisError::InvalidTransition { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_state",
            err.to_string(),
        ),
        AnalysisError::InvalidInput { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        AnalysisError::Storage { message } => storage(message),
    }
}

fn map_gate_error(err: &GateError) -> (StatusCode, &'static str, String) {
    match err {
        GateError::GateNotFound | GateError::ConditionNotFound => {
            (StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        GateError::NameConflict => (StatusCode::CONFLICT, "conflict", err.to_string()),
        GateError::InvalidInput { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        GateError::Storage { message } => storage(message),
    }
}

fn map_lock_error(err: &LockError) -> (StatusCode, &'static str, String) {
    match err {
        LockError::Timeout { .. } => (StatusCode::CONFLICT, "conflict", err.to_string()),
        LockError::Storage { message } => storage(message),
    }
}

fn map_rag_error(err: &RagError) -> (StatusCode, &'static str, String) {
    match err {
        RagError::DeltaNotFound | RagError::BranchIndexNotFound => {
            (StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        RagError::InvalidTransition { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_state",
            err.to_string(),
        ),
        RagError::Storage { message } => storage(message),
    }
}

fn map_project_error(err: &ProjectError) -> (StatusCode, &'static str, String) {
    match err {
        ProjectError::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        ProjectError::AlreadyBound => (StatusCode::CONFLICT, "conflict", err.to_string()),
        ProjectError::InvalidInput { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        ProjectError::Storage { message } => storage(message),
    }
}

fn map_webhook_error(err: &WebhookError) -> (StatusCode, &'static str, String) {
    match err {
        WebhookError::Malformed { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        WebhookError::BadSignature => {
            (StatusCode::UNAUTHORIZED, "unauthorized", err.to_string())
        }
    }
}

fn map_rate_limit_error(err: &RateLimitError) -> (StatusCode, &'static str, String) {
    match err {
        RateLimitError::Storage { message } => storage(message),
    }
}

fn map_collaborator_error(err: &CollaboratorError) -> (StatusCode, &'static str, String) {
    match err {
        CollaboratorError::Timeout { .. } => {
            (StatusCode::GATEWAY_TIMEOUT, "timeout", err.to_string())
        }
        CollaboratorError::Transient { .. } | CollaboratorError::Permanent { .. } => {
            (StatusCode::BAD_GATEWAY, "upstream_error", err.to_string())
        }
        CollaboratorError::ProviderNotConfigured { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "provider_unavailable",
            err.to_string(),
        ),
    }
}

fn map_config_error(err: &ConfigError) -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        err.to_string(),
    )
}
