// Calendar API server
// Decision: Retention purge runs as a background task in the same process

use std::sync::Arc;

use anyhow::{Context, Result};
use calendar_core::telemetry::{init_telemetry, TelemetryConfig};
use calendar_core::OtelMetrics;
use calendar_server::{build_router, EventService, RetentionJob, ServerConfig};
use calendar_storage::create_event_store;
use tokio_util::sync::CancellationToken;
use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via OTEL_SERVICE_NAME, OTEL_EXPORTER_OTLP_ENDPOINT, RUST_LOG
    let _telemetry_guard = init_telemetry(
        TelemetryConfig::from_env("calendar-server").with_version(env!("CARGO_PKG_VERSION")),
    );

    tracing::info!("calendar-server starting...");

    let config = ServerConfig::from_env()?;
    let store = create_event_store(config.storage, config.database_url.as_deref())
        .await
        .context("Failed to create event store")?;
    let metrics = Arc::new(OtelMetrics::global().with_attribute("service", "calendar-server"));

    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }

    let cancel = CancellationToken::new();
    let retention = RetentionJob::new(
        Arc::new(EventService::new(store.clone(), metrics.clone())),
        config.retention,
        config.retention_interval,
    );
    let retention_task = tokio::spawn(retention.run(cancel.clone()));

    let app = build_router(store, metrics, config.retention, &config.api_prefix);

    let cors_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let app = if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        app
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::HeaderName::from_static("x-owner"),
                ]),
        )
    };
    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!(addr = %config.http_addr, storage = %config.storage, "HTTP server listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received shutdown signal");
            }
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    cancel.cancel();
    retention_task.await.ok();
    tracing::info!("Server shutdown complete");
    Ok(())
}
