//! HTTP implementations of the collaborator traits.

pub mod github;
pub mod inference;
pub mod rag_service;

use cc_core::error::{CodeCrowError, CollaboratorError};
use reqwest::{Response, StatusCode};
use std::time::Duration;

pub use github::GithubClient;
pub use inference::InferenceClient;
pub use rag_service::RagServiceClient;

const USER_AGENT: &str = concat!("codecrow/", env!("CARGO_PKG_VERSION"));

/// Shared connection pool for every client. Per-call deadlines are applied
/// by the caller's retry policy; this timeout is only a backstop.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, CodeCrowError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|err| CodeCrowError::Internal {
            message: format!("http client: {err}"),
        })
}

pub(crate) fn transport_error(service: &'static str, err: &reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout { service }
    } else if err.is_decode() {
        CollaboratorError::Permanent {
            service,
            message: err.to_string(),
        }
    } else {
        CollaboratorError::Transient {
            service,
            message: err.to_string(),
        }
    }
}

/// Server errors and throttling are retryable; other non-success statuses
/// are not.
pub(crate) async fn check_status(
    service: &'static str,
    response: Response,
) -> Result<Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{status}: {}", truncate(&body, 200));
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(CollaboratorError::Transient { service, message })
    } else {
        Err(CollaboratorError::Permanent { service, message })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

fn not_configured(service: &str) -> CollaboratorError {
    CollaboratorError::ProviderNotConfigured {
        provider: service.to_string(),
    }
}
