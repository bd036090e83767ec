use crate::middleware::correlation::CorrelationId;
use crate::routes::error::map_error;
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use cc_core::error::{CodeCrowError, WebhookError};
use cc_core::types::{JobId, VcsProvider};
use cc_core::webhook::{event_type_header, normalize, verify_github_signature, verify_gitlab_token};
use cc_core::{RequestContext, RouteDecision};
use cc_events::types::EventSource;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookAck {
    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            status: "ignored".to_string(),
            job_id: None,
            reason: Some(reason.into()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(receive))
        .with_state(state)
}

/// Verifies, normalizes and routes one delivery. Accepted jobs run in the
/// background; the response only says whether a job was recorded.
#[utoipa::path(
    post,
    path = "/api/webhooks/{provider}",
    params(("provider" = String, Path, description = "github, gitlab or bitbucket")),
    request_body(content = String, description = "Provider webhook payload"),
    responses(
        (status = 200, body = WebhookAck),
        (status = 202, body = WebhookAck),
        (status = 400),
        (status = 401)
    )
)]
pub(crate) async fn receive(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = RequestContext::new(EventSource::Webhook, Some(correlation.0));
    let provider: VcsProvider = match provider.parse() {
        Ok(provider) => provider,
        Err(message) => return reject(WebhookError::Malformed { message }, &ctx),
    };
    if let Some(secret) = &state.config.server.webhook_secret
        && let Err(err) = verify(provider, secret, &headers, &body)
    {
        tracing::warn!(%provider, "webhook signature rejected");
        return reject(err, &ctx);
    }

    let Some(event_type) = header(&headers, event_type_header(provider)) else {
        return reject(
            WebhookError::Malformed {
                message: format!("missing {} header", event_type_header(provider)),
            },
            &ctx,
        );
    };
    let event = match normalize(provider, event_type, &body) {
        Ok(Some(event)) => event,
        Ok(None) => {
            tracing::debug!(%provider, event_type, "unhandled webhook event");
            return Json(WebhookAck::ignored(format!("unhandled event {event_type}")))
                .into_response();
        }
        Err(err) => return reject(err, &ctx),
    };

    match state.orchestrator.route(&ctx, &event) {
        Ok(RouteDecision::Ignored { reason }) => Json(WebhookAck::ignored(reason)).into_response(),
        Ok(RouteDecision::Accepted { job }) => {
            let ack = WebhookAck {
                status: "accepted".to_string(),
                job_id: Some(job.id.clone()),
                reason: None,
            };
            let orchestrator = state.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator.process(&ctx, &job, &event).await;
            });
            (StatusCode::ACCEPTED, Json(ack)).into_response()
        }
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}

fn reject(err: WebhookError, ctx: &RequestContext) -> Response {
    map_error(&CodeCrowError::Webhook(err), ctx.correlation_id.clone()).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn verify(
    provider: VcsProvider,
    secret: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), WebhookError> {
    match provider {
        VcsProvider::Github => {
            let signature =
                header(headers, "x-hub-signature-256").ok_or(WebhookError::BadSignature)?;
            verify_github_signature(secret, body, signature)
        }
        VcsProvider::Gitlab => {
            let token = header(headers, "x-gitlab-token").ok_or(WebhookError::BadSignature)?;
            verify_gitlab_token(secret, token)
        }
        VcsProvider::Bitbucket => {
            let signature =
                header(headers, "x-hub-signature").ok_or(WebhookError::BadSignature)?;
            verify_github_signature(secret, body, signature)
        }
    }
}
