//! Client for the external vector index.

use super::{check_status, not_configured, transport_error};
use async_trait::async_trait;
use cc_core::collaborators::VectorIndex;
use cc_core::error::CollaboratorError;
use cc_core::types::{Chunk, ContextHit, IndexScope};
use serde::{Deserialize, Serialize};

const SERVICE: &str = "rag";

#[derive(Clone)]
pub struct RagServiceClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Serialize)]
struct IndexRequest<'a> {
    scope: &'a IndexScope,
    chunks: &'a [Chunk],
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    scope: &'a IndexScope,
    query: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    hits: Vec<ContextHit>,
}

#[derive(Serialize)]
struct ScopeRequest<'a> {
    scope: &'a IndexScope,
}

impl RagServiceClient {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, CollaboratorError> {
        let base = self.base_url.as_ref().ok_or_else(|| not_configured(SERVICE))?;
        let response = self
            .http
            .post(format!("{base}{path}"))
            .json(body)
            .send()
            .await
            .map_err(|err| transport_error(SERVICE, &err))?;
        check_status(SERVICE, response).await
    }
}

#[async_trait]
impl VectorIndex for RagServiceClient {
    async fn index_chunks(
        &self,
        scope: &IndexScope,
        chunks: &[Chunk],
    ) -> Result<(), CollaboratorError> {
        self.post("/v1/index", &IndexRequest { scope, chunks })
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        scope: &IndexScope,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ContextHit>, CollaboratorError> {
        let response = self
            .post("/v1/query", &QueryRequest { scope, query, limit })
            .await?;
        let payload: QueryResponse = response
            .json()
            .await
            .map_err(|err| transport_error(SERVICE, &err))?;
        Ok(payload.hits)
    }

    async fn delete_scope(&self, scope: &IndexScope) -> Result<(), CollaboratorError> {
        self.post("/v1/delete", &ScopeRequest { scope }).await?;
        Ok(())
    }
}
