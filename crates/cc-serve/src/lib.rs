pub mod clients;
pub mod housekeeping;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod sse;

use axum::http::Request;
use axum::Router;
use cc_core::collaborators::Collaborators;
use cc_core::config::CodeCrowConfig;
use cc_core::{CodeCrow, CodeCrowError, CoreProvider, Orchestrator};
use cc_db::{DbProvider, DbStore};
use cc_events::bus::EventBus;
use middleware::correlation::CorrelationId;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<DbProvider>,
    pub orchestrator: Orchestrator<DbProvider>,
    pub config: Arc<CodeCrowConfig>,
}

impl AppState {
    pub fn new(
        provider: Arc<DbProvider>,
        collaborators: Collaborators,
        config: Arc<CodeCrowConfig>,
    ) -> Self {
        let orchestrator =
            Orchestrator::new(Arc::clone(&provider), collaborators, Arc::clone(&config));
        Self {
            provider,
            orchestrator,
            config,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        self.provider.event_bus()
    }
}

pub fn build_codecrow(state: &AppState) -> Result<CodeCrow<DbStore>, CodeCrowError> {
    state.provider.open()
}

pub fn correlation_id_from_request<B>(request: &Request<B>) -> Option<String> {
    request
        .extensions()
        .get::<CorrelationId>()
        .map(|value| value.0.clone())
}

pub fn app(state: AppState) -> Router {
    routes::router(state).layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app(state)).await
}
