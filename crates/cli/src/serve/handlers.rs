//! Route handlers for the document API.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use docflow_storage::DocumentId;
use serde::Deserialize;

use super::error::ApiError;
use super::json_error;
use super::state::AppState;

type Body<T> = Result<Json<T>, JsonRejection>;
type IdPath = Result<Path<DocumentId>, PathRejection>;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRequest {
    #[serde(default)]
    author: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BatchRequest {
    #[serde(default)]
    document_ids: Vec<DocumentId>,
    #[serde(default)]
    initiator: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InitiatorRequest {
    #[serde(default)]
    initiator: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConcurrencyParams {
    #[serde(default = "default_threads")]
    threads: usize,
    #[serde(default = "default_attempts")]
    attempts: usize,
}

fn default_threads() -> usize {
    5
}

fn default_attempts() -> usize {
    10
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

/// POST /api/v1/documents
pub(crate) async fn handle_create(
    State(state): State<Arc<AppState>>,
    body: Body<CreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let document = state.service.create(&req.author, &req.title).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// GET /api/v1/documents/{id}
pub(crate) async fn handle_get(
    State(state): State<Arc<AppState>>,
    id: IdPath,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.get_with_history(id).await?))
}

/// POST /api/v1/documents/batch-get
pub(crate) async fn handle_batch_get(
    State(state): State<Arc<AppState>>,
    body: Body<Vec<DocumentId>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(ids) = body?;
    Ok(Json(state.service.get_many(&ids).await?))
}

/// POST /api/v1/documents/submit
pub(crate) async fn handle_submit_batch(
    State(state): State<Arc<AppState>>,
    body: Body<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let outcomes = state
        .service
        .submit_batch(&req.document_ids, &req.initiator)
        .await?;
    Ok(Json(outcomes))
}

/// POST /api/v1/documents/approve
pub(crate) async fn handle_approve_batch(
    State(state): State<Arc<AppState>>,
    body: Body<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let outcomes = state
        .service
        .approve_batch(&req.document_ids, &req.initiator)
        .await?;
    Ok(Json(outcomes))
}

/// POST /api/v1/documents/{id}/submit
pub(crate) async fn handle_submit_one(
    State(state): State<Arc<AppState>>,
    id: IdPath,
    body: Body<InitiatorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let Json(req) = body?;
    Ok(Json(state.service.submit(id, &req.initiator).await?))
}

/// POST /api/v1/documents/{id}/approve
pub(crate) async fn handle_approve_one(
    State(state): State<Arc<AppState>>,
    id: IdPath,
    body: Body<InitiatorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let Json(req) = body?;
    Ok(Json(state.service.approve(id, &req.initiator).await?))
}

/// POST /api/v1/documents/{id}/concurrency-test?threads=N&attempts=M
pub(crate) async fn handle_concurrency_test(
    State(state): State<Arc<AppState>>,
    id: IdPath,
    params: Result<Query<ConcurrencyParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let Query(params) = params?;
    let report = state
        .service
        .test_concurrency(id, params.threads, params.attempts)
        .await?;
    Ok(Json(report))
}
