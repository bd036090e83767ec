pub mod analyses;
pub mod error;
pub mod events;
pub mod gates;
pub mod jobs;
pub mod projects;
pub mod rag;
pub mod webhooks;

use crate::middleware::correlation::correlation_middleware;
use crate::{openapi, AppState};
use axum::middleware;
use axum::Router;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(jobs::router(state.clone()))
        .merge(analyses::router(state.clone()))
        .merge(gates::router(state.clone()))
        .merge(projects::router(state.clone()))
        .merge(rag::router(state.clone()))
        .merge(events::router(state.clone()))
        .merge(webhooks::router(state))
        .merge(openapi::router())
        .route_layer(middleware::from_fn(correlation_middleware));

    Router::new().nest("/api", api)
}
