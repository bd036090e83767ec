//! Client for the inference service that runs the AI review.

use super::{check_status, not_configured, transport_error};
use async_trait::async_trait;
use cc_core::collaborators::AiClient;
use cc_core::error::CollaboratorError;
use cc_core::types::{AiIssue, ContextHit};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const SERVICE: &str = "inference";

#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    diff: &'a str,
    context: &'a [ContextHit],
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    issues: Vec<AiIssue>,
}

#[derive(Serialize)]
struct SummarizeRequest<'a> {
    diff: &'a str,
}

#[derive(Serialize)]
struct AskRequest<'a> {
    question: &'a str,
    diff: &'a str,
    context: &'a [ContextHit],
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
}

impl InferenceClient {
    /// Without a base URL every call fails as not configured.
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CollaboratorError> {
        let base = self.base_url.as_ref().ok_or_else(|| not_configured(SERVICE))?;
        let response = self
            .http
            .post(format!("{base}{path}"))
            .json(body)
            .send()
            .await
            .map_err(|err| transport_error(SERVICE, &err))?;
        check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|err| transport_error(SERVICE, &err))
    }
}

#[async_trait]
impl AiClient for InferenceClient {
    async fn run_analysis(
        &self,
        diff: &str,
        context: &[ContextHit],
    ) -> Result<Vec<AiIssue>, CollaboratorError> {
        let response: AnalyzeResponse = self
            .post("/v1/analyze", &AnalyzeRequest { diff, context })
            .await?;
        Ok(response.issues)
    }

    async fn summarize(&self, diff: &str) -> Result<String, CollaboratorError> {
        let response: TextResponse = self
            .post("/v1/summarize", &SummarizeRequest { diff })
            .await?;
        Ok(response.text)
    }

    async fn ask(
        &self,
        question: &str,
        diff: &str,
        context: &[ContextHit],
    ) -> Result<String, CollaboratorError> {
        let response: TextResponse = self
            .post(
                "/v1/ask",
                &AskRequest {
                    question,
                    diff,
                    context,
                },
            )
            .await?;
        Ok(response.text)
    }
}
