//! REST surface.
//!
//! Every handler is independent: a failure becomes a [`Notification`] for
//! that request only and never affects the server.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::flow::{FlowInfo, FlowRegistry};
use crate::forms::{RiskForm, SymptomForm};
use crate::notification::{
    bad_request, flow_failure, form_failure, share_denied, storage_failure, ApiError, Operation,
};
use crate::shapes::{RiskScoreOutput, SymptomAnalysisOutput};
use crate::storage::{DocumentInfo, DocumentStore, StoredDocument};

/// Large enough for an X-ray image or a few minutes of audio as base64.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub flows: FlowRegistry,
    pub store: Arc<dyn DocumentStore>,
    /// `None` turns the share endpoints off.
    pub share_token: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/flows", get(list_flows))
        .route("/api/flows/:flow_id", post(run_flow))
        .route("/api/forms/symptom-analysis", post(symptom_form))
        .route("/api/forms/risk-score", post(risk_form))
        .route("/api/documents", get(list_documents).post(upload_document))
        .route("/api/documents/:name", get(download_document))
        .route("/api/share/documents", get(shared_list))
        .route("/api/share/documents/:name", get(shared_download))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "storage": state.store.backend_name(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_flows(State(state): State<AppState>) -> Json<Vec<FlowInfo>> {
    Json(state.flows.flows())
}

async fn run_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let op = Operation::for_flow(&flow_id);
    let Json(input) = body.map_err(|e| bad_request(op, e.body_text()))?;

    let output = state
        .flows
        .run(&flow_id, input)
        .await
        .map_err(|e| flow_failure(op, &e))?;
    Ok(Json(output))
}

async fn symptom_form(
    State(state): State<AppState>,
    body: Result<Json<SymptomForm>, JsonRejection>,
) -> ApiResult<Json<SymptomAnalysisOutput>> {
    let op = Operation::SymptomAnalysis;
    let Json(form) = body.map_err(|e| bad_request(op, e.body_text()))?;
    let input = form.into_input().map_err(|errors| form_failure(op, &errors))?;

    let output = state
        .flows
        .symptom_analysis()
        .run(&input)
        .await
        .map_err(|e| flow_failure(op, &e))?;
    Ok(Json(output))
}

async fn risk_form(
    State(state): State<AppState>,
    body: Result<Json<RiskForm>, JsonRejection>,
) -> ApiResult<Json<RiskScoreOutput>> {
    let op = Operation::RiskScore;
    let Json(form) = body.map_err(|e| bad_request(op, e.body_text()))?;
    let input = form.into_input().map_err(|errors| form_failure(op, &errors))?;

    let output = state
        .flows
        .risk_score()
        .run(&input)
        .await
        .map_err(|e| flow_failure(op, &e))?;
    Ok(Json(output))
}

async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<StoredDocument>)> {
    let op = Operation::Upload;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(op, e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("file").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(op, e.body_text()))?;

        let stored = state
            .store
            .upload(&name, bytes.to_vec())
            .await
            .map_err(|e| storage_failure(op, &e))?;
        info!(path = %stored.path, size = bytes.len(), "document uploaded");
        return Ok((StatusCode::CREATED, Json(stored)));
    }
    Err(bad_request(op, "No file provided."))
}

async fn list_documents(State(state): State<AppState>) -> ApiResult<Json<Vec<DocumentInfo>>> {
    let docs = state
        .store
        .list()
        .await
        .map_err(|e| storage_failure(Operation::ListFiles, &e))?;
    Ok(Json(docs))
}

async fn download_document(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let bytes = state
        .store
        .download(&name)
        .await
        .map_err(|e| storage_failure(Operation::Download, &e))?;
    Ok(attachment(&name, bytes))
}

#[derive(Debug, Deserialize)]
struct ShareQuery {
    token: Option<String>,
}

fn check_share(state: &AppState, query: &ShareQuery) -> ApiResult<()> {
    match (&state.share_token, &query.token) {
        (Some(expected), Some(given)) if expected == given => Ok(()),
        _ => Err(share_denied()),
    }
}

async fn shared_list(
    State(state): State<AppState>,
    Query(query): Query<ShareQuery>,
) -> ApiResult<Json<Vec<DocumentInfo>>> {
    check_share(&state, &query)?;
    list_documents(State(state)).await
}

async fn shared_download(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ShareQuery>,
) -> ApiResult<Response> {
    check_share(&state, &query)?;
    download_document(State(state), Path(name)).await
}

fn attachment(name: &str, bytes: Vec<u8>) -> Response {
    let filename = name.replace(['"', '\\'], "_");
    (
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}
