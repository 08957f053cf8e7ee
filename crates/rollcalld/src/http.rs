//! HTTP surface: train, recognize, view_attendance, status.
//!
//! Handlers only move bytes between the request and the engine thread; every
//! decision about the payload is made by the attendance service.

use crate::engine::{EngineError, EngineHandle};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::{LedgerState, ServiceError};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub fn router(engine: EngineHandle, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/train", post(train))
        .route("/recognize", post(recognize))
        .route("/view_attendance", get(view_attendance))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// JSON error body `{"error": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Service(ServiceError::MalformedInput(_)) => StatusCode::BAD_REQUEST,
            EngineError::Service(ServiceError::UnsupportedMedia(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            EngineError::Service(ServiceError::NotFound(_)) => StatusCode::NOT_FOUND,
            EngineError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "request failed");
        }
        ApiError::new(status, e.to_string())
    }
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Pull the `file` part out of a multipart body.
async fn file_part(mut multipart: Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().trim().to_string();
        if filename.is_empty() {
            return Err(ApiError::new(StatusCode::BAD_REQUEST, "No selected file"));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        return Ok(Upload {
            filename,
            bytes: bytes.to_vec(),
        });
    }
    Err(ApiError::new(StatusCode::BAD_REQUEST, "No file part"))
}

async fn train(State(engine): State<EngineHandle>, multipart: Multipart) -> Result<Json<serde_json::Value>, ApiError> {
    let upload = file_part(multipart).await?;
    tracing::info!(filename = %upload.filename, bytes = upload.bytes.len(), "roster received");

    let summary = engine.train(upload.bytes, Some(upload.filename)).await?;
    Ok(Json(json!({
        "message": "Training complete!",
        "enrolled": summary.enrolled,
        "skipped": summary.skipped.len(),
    })))
}

async fn recognize(
    State(engine): State<EngineHandle>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let upload = file_part(multipart).await?;
    let outcome = engine.recognize(upload.bytes, Some(upload.filename)).await?;

    let body = if outcome.recognized_names.is_empty() {
        json!({
            "status": "failure",
            "message": "No faces detected, attendance file cleared",
            "recognized_names": [],
        })
    } else {
        json!({
            "status": "success",
            "message": "Attendance marked",
            "recognized_names": outcome.recognized_names,
        })
    };
    Ok(Json(body))
}

async fn view_attendance(State(engine): State<EngineHandle>) -> Result<Response, ApiError> {
    let bytes = engine.view_attendance().await?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"attendance.xlsx\""),
        ],
        bytes,
    )
        .into_response())
}

async fn status(State(engine): State<EngineHandle>) -> Result<Json<serde_json::Value>, ApiError> {
    let status = engine.status().await?;
    let records = match status.ledger {
        LedgerState::Present(n) => n,
        LedgerState::Absent => 0,
    };
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "identities": status.identities,
        "attendance_file": status.ledger != LedgerState::Absent,
        "attendance_records": records,
        "tolerance": status.tolerance,
    })))
}
