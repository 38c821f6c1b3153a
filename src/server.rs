//! HTTP surface: ingestion, export, and stream listing over one [`Pipeline`].
//!
//! Exports are arbitrated: identical concurrent export requests share one
//! render, and renders beyond the concurrency ceiling are refused with
//! `429`. The stream listing sits behind a [`FetchGate`] and is invalidated
//! whenever a new daily file is created.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use opslog_arbiter::{cache_key, Arbiter, ArbiterConfig, ArbiterError, CallMode, FetchGate};
use opslog_core::config::ArbiterSettings;
use opslog_core::error::ExportError;
use opslog_core::export::{ExportDocument, ExportQuery};
use opslog_core::store::AppendStatus;
use opslog_core::{LogEvent, Pipeline};
use serde::Serialize;
use serde_json::json;

const STREAMS_KEY: &str = "streams";

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    arbiter: Arbiter,
    streams: Arc<FetchGate<Vec<String>>>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, settings: &ArbiterSettings) -> Self {
        let arbiter = Arbiter::new(arbiter_config(settings));
        let streams = Arc::new(FetchGate::new(arbiter.clone(), settings.cache_ttl()));
        Self {
            pipeline,
            arbiter,
            streams,
        }
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }
}

pub fn arbiter_config(settings: &ArbiterSettings) -> ArbiterConfig {
    ArbiterConfig {
        max_concurrent: settings.max_concurrent,
        freshness: settings.freshness(),
        debounce: settings.debounce(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/logs", post(ingest))
        .route("/api/logs/export", get(export))
        .route("/api/logs/streams", get(streams))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    status: &'static str,
}

async fn ingest(State(state): State<AppState>, Json(event): Json<LogEvent>) -> impl IntoResponse {
    let status = state.pipeline.ingest(event).await;
    if let AppendStatus::Written { created: true, .. } = &status {
        state.streams.cache().invalidate(STREAMS_KEY);
    }
    let body = IngestResponse {
        status: if status.is_written() { "written" } else { "failed" },
    };
    (StatusCode::ACCEPTED, Json(body))
}

async fn export(State(state): State<AppState>, Query(query): Query<ExportQuery>) -> Response {
    // A malformed range is the caller's fault regardless of load.
    if let Err(e) = query.bounds() {
        return export_error(ArbiterError::Operation(Arc::new(e)));
    }
    let key = cache_key("export", &(&query.stream, &query.start, &query.end));
    let pipeline = Arc::clone(&state.pipeline);
    let outcome = state
        .arbiter
        .call(&key, CallMode::SingleFlight, move || async move {
            pipeline.export(&query).await.map_err(Arc::new)
        })
        .await;

    match outcome {
        Ok(doc) => csv_attachment(doc),
        Err(e) => export_error(e),
    }
}

async fn streams(State(state): State<AppState>) -> Response {
    let pipeline = Arc::clone(&state.pipeline);
    let outcome = state
        .streams
        .fetch(STREAMS_KEY, CallMode::SingleFlight, move || async move {
            pipeline.streams().await.map_err(Arc::new)
        })
        .await;

    match outcome {
        Ok(names) => Json(names).into_response(),
        Err(ArbiterError::TooManyConcurrent) => too_many(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to list streams");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to list streams", "details": e.to_string() })),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn csv_attachment(doc: ExportDocument) -> Response {
    tracing::info!(file = %doc.file_name, rows = doc.rows, "export served");
    let disposition = format!("attachment; filename=\"{}\"", doc.file_name);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        doc.body,
    )
        .into_response()
}

fn export_error(err: ArbiterError<Arc<ExportError>>) -> Response {
    match err {
        ArbiterError::TooManyConcurrent => too_many(),
        ArbiterError::Operation(e) if e.is_client_error() => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
        other => {
            tracing::error!(error = %other, "export failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to export logs", "details": other.to_string() })),
            )
                .into_response()
        }
    }
}

fn too_many() -> Response {
    let err = ArbiterError::<String>::TooManyConcurrent;
    (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": err.to_string() }))).into_response()
}
