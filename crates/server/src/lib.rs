// Calendar API server library
// Decision: Router construction lives here so binaries and tests share it

pub mod api;
pub mod config;
pub mod openapi;
pub mod retention;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use calendar_core::{EventStore, MetricsSink};
use serde::Serialize;
use utoipa::OpenApi;

pub use config::ServerConfig;
pub use retention::RetentionJob;
pub use services::EventService;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDoc::openapi())
}

/// Build the full router: health and OpenAPI document at the root, API routes under `api_prefix`.
pub fn build_router(
    store: Arc<dyn EventStore>,
    metrics: Arc<dyn MetricsSink>,
    retention: chrono::Duration,
    api_prefix: &str,
) -> Router {
    let service = Arc::new(EventService::new(store, metrics));
    let api_routes = api::events::routes(api::events::AppState::new(service, retention));

    Router::new()
        .route("/health", get(health))
        .route("/api-doc/openapi.json", get(openapi_json))
        .merge(build_router_with_prefix(api_routes, api_prefix))
}

/// Nest `api_routes` under `api_prefix` unless it is empty
fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}
