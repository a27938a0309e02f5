//! `docflow serve` -- HTTP JSON API for the document workflow.
//!
//! Runs the document service over an in-memory store using `axum` +
//! `tokio`, and drives the SUBMIT/APPROVE background workers on the same
//! runtime.
//!
//! Security features:
//! - CORS headers on all responses (permissive for local dev)
//! - Optional per-IP rate limiting via DOCFLOW_RATE_LIMIT (requests/min)
//! - Optional API key authentication via DOCFLOW_API_KEY env var
//!
//! Endpoints:
//! - GET  /health                                  - Server status (exempt from auth)
//! - POST /api/v1/documents                        - Create a DRAFT document
//! - GET  /api/v1/documents/{id}                   - Document with history
//! - POST /api/v1/documents/batch-get              - Documents for a list of ids
//! - POST /api/v1/documents/submit                 - Batch submit
//! - POST /api/v1/documents/approve                - Batch approve
//! - POST /api/v1/documents/{id}/submit            - Submit one document
//! - POST /api/v1/documents/{id}/approve           - Approve one document
//! - POST /api/v1/documents/{id}/concurrency-test  - Concurrent approval run
//!
//! All responses use Content-Type: application/json.

mod error;
mod handlers;
mod middleware;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use docflow_engine::{DocumentService, EngineConfig};
use docflow_storage::InMemoryStorage;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use self::handlers::{
    handle_approve_batch, handle_approve_one, handle_batch_get, handle_concurrency_test,
    handle_create, handle_get, handle_health, handle_not_found, handle_submit_batch,
    handle_submit_one,
};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

const ENV_API_KEY: &str = "DOCFLOW_API_KEY";
const ENV_RATE_LIMIT: &str = "DOCFLOW_RATE_LIMIT";

/// Construct a JSON error response with the given status code, error code
/// and message.
fn json_error(status: StatusCode, code: &str, message: &str) -> impl IntoResponse {
    (
        status,
        Json(serde_json::json!({ "error": code, "message": message })),
    )
}

pub(crate) struct ServeOptions {
    pub(crate) port: u16,
    pub(crate) config: Option<PathBuf>,
    /// Start the background workers (still subject to `workers.enabled`).
    pub(crate) workers: bool,
}

/// Build the router over a prepared application state.
fn router(state: Arc<AppState>) -> Router {
    // CORS: permissive for local dev
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/documents", post(handle_create))
        .route("/api/v1/documents/batch-get", post(handle_batch_get))
        .route("/api/v1/documents/submit", post(handle_submit_batch))
        .route("/api/v1/documents/approve", post(handle_approve_batch))
        .route("/api/v1/documents/{id}", get(handle_get))
        .route("/api/v1/documents/{id}/submit", post(handle_submit_one))
        .route("/api/v1/documents/{id}/approve", post(handle_approve_one))
        .route(
            "/api/v1/documents/{id}/concurrency-test",
            post(handle_concurrency_test),
        )
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the HTTP server and, unless disabled, the background workers.
///
/// Security:
/// - CORS: Permissive (`Any` origin) for local dev; tighten for production.
/// - Rate limit: Off unless `DOCFLOW_RATE_LIMIT` is set to a positive number.
/// - API key: If `DOCFLOW_API_KEY` is set, all endpoints except /health require auth.
pub(crate) async fn start_server(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load(options.config.as_deref())?;
    if let Some(path) = &options.config {
        eprintln!("Loaded configuration from {}", path.display());
    }

    let storage = Arc::new(InMemoryStorage::new());
    let service = DocumentService::new(storage, &config);

    let rate_limit = std::env::var(ENV_RATE_LIMIT)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|limit| *limit > 0);

    let api_key = std::env::var(ENV_API_KEY).ok().filter(|k| !k.is_empty());

    if api_key.is_some() {
        eprintln!("API key authentication enabled");
    }
    if let Some(limit) = rate_limit {
        eprintln!("Rate limit: {} requests per minute per IP", limit);
    }

    let workers = if options.workers && config.workers.enabled {
        let scheduler = Arc::new(service.scheduler(&config));
        eprintln!(
            "Workers running: batch size {}, submit every {} ms, approve every {} ms",
            config.workers.batch_size, config.workers.submit_delay_ms, config.workers.approve_delay_ms
        );
        Some(scheduler.spawn())
    } else {
        eprintln!("Workers disabled");
        None
    };

    let state = Arc::new(AppState {
        service,
        rate_limiter: rate_limit.map(RateLimiter::new),
        api_key,
    });
    let app = router(state);

    let addr = format!("0.0.0.0:{}", options.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    eprintln!("docflow listening on http://0.0.0.0:{}", options.port);
    tracing::info!(port = options.port, "server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(handle) = workers {
        handle.shutdown().await;
    }
    eprintln!("\nServer shut down.");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    eprintln!("\nReceived shutdown signal...");
}
