use crate::types::enums::{AnalysisStatus, DeltaStatus, JobStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found")]
    NotFound,
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis not found")]
    NotFound,
    #[error("analysis already recorded for this change")]
    Duplicate,
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: AnalysisStatus,
        to: AnalysisStatus,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate not found")]
    GateNotFound,
    #[error("condition not found")]
    ConditionNotFound,
    #[error("name already exists")]
    NameConflict,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock wait timed out for {key}")]
    Timeout { key: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("delta not found")]
    DeltaNotFound,
    #[error("branch index not found")]
    BranchIndexNotFound,
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: DeltaStatus, to: DeltaStatus },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project not found")]
    NotFound,
    #[error("repository already bound")]
    AlreadyBound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed payload: {message}")]
    Malformed { message: String },
    #[error("signature mismatch")]
    BadSignature,
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid config: {message}")]
    Parse { message: String },
}

/// Failures reported by the VCS, AI or vector-index collaborators.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{service} timed out")]
    Timeout { service: &'static str },
    #[error("{service} transient failure: {message}")]
    Transient {
        service: &'static str,
        message: String,
    },
    #[error("{service} failed: {message}")]
    Permanent {
        service: &'static str,
        message: String,
    },
    #[error("provider not configured: {provider}")]
    ProviderNotConfigured { provider: String },
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transient { .. })
    }
}

#[derive(Debug, Error)]
pub enum CodeCrowError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Rag(#[from] RagError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("internal error: {message}")]
    Internal { message: String },
}
