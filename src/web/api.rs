use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::collection::{CollectionJob, Collector, StartError};
use crate::query::{self, EntryParams, EntryQuery, QueryError};
use crate::storage::{CountrySummary, Storage, StorageError, StoredLogEntry};

/// Shared state for the API handlers
#[derive(Clone)]
pub struct AppState {
    pub collector: Collector,
    pub storage: Arc<dyn Storage>,
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub entries: Vec<StoredLogEntry>,
    pub total_count: u64,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    InternalError(String),
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::InternalError(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::InternalError(msg) => {
                // Details stay in the log
                tracing::error!(error = %msg, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /api/collect
pub async fn trigger_collection(State(state): State<AppState>) -> Response {
    match state.collector.trigger().await {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "message": "started", "run_id": run_id })),
        )
            .into_response(),
        Err(StartError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "message": "already running" })),
        )
            .into_response(),
    }
}

/// GET /api/collect/status
pub async fn collection_status(State(state): State<AppState>) -> Json<CollectionJob> {
    Json(state.collector.job().snapshot().await)
}

/// GET /api/entries?limit&skip&ip_address&country&domain&status_code&sort_by&sort_dir
pub async fn list_entries(
    State(state): State<AppState>,
    Query(params): Query<EntryParams>,
) -> Result<Json<EntriesResponse>, ApiError> {
    let query = EntryQuery::from_params(&params)?;
    let (entries, total_count) = state.storage.query_entries(&query).await?;

    Ok(Json(EntriesResponse {
        entries,
        total_count,
    }))
}

/// GET /api/summary/by-country
pub async fn summary_by_country(
    State(state): State<AppState>,
) -> Result<Json<Vec<CountrySummary>>, ApiError> {
    let summary = query::country_summary(state.storage.as_ref()).await?;
    Ok(Json(summary))
}

/// Fallback for unknown paths under /api
pub async fn api_not_found() -> ApiError {
    ApiError::NotFound
}
