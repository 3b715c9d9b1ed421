use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Deserialize)]
struct LlmRequest {
    shape_id: String,
    prompt: String,
    #[serde(default)]
    media: Vec<String>,
}

#[derive(Serialize)]
struct LlmResponse {
    output: String,
}

#[derive(Clone)]
struct AppState {
    attempt_count: Arc<AtomicUsize>,
    fail_attempts: usize,
}

/// Deterministic answer for each flow the service knows.
fn canned_output(shape_id: &str) -> Option<Value> {
    let output = match shape_id {
        "symptom-analysis" => json!({
            "potentialCauses": "Viral upper respiratory infection; seasonal allergies; early influenza.",
            "recommendedNextSteps": "Rest and hydrate. See a general practitioner if fever exceeds 39C or symptoms last more than a week."
        }),
        "clinical-transcription" => json!({
            "transcription": "Subjective: patient reports a dry cough for three days.\nObjective: afebrile, chest clear.\nPlan: symptomatic treatment, review in one week."
        }),
        "risk-score" => json!({
            "riskScore": 72,
            "riskLevel": "High",
            "rationale": "Age, hypertension and two recent admissions raise the cardiovascular risk."
        }),
        "xray-analysis" => json!({
            "analysis": [
                {"condition": "Pneumonia", "probability": 0.82},
                {"condition": "Pleural effusion", "probability": 0.11}
            ],
            "summary": "Right lower lobe opacity consistent with pneumonia."
        }),
        _ => return None,
    };
    Some(output)
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<LlmRequest>,
) -> Result<Json<LlmResponse>, (StatusCode, Json<Value>)> {
    let attempt = state.attempt_count.fetch_add(1, Ordering::SeqCst) + 1;
    info!(
        attempt,
        shape = %req.shape_id,
        prompt_bytes = req.prompt.len(),
        media = ?req.media,
        "mock LLM request"
    );

    let Some(valid) = canned_output(&req.shape_id) else {
        warn!(shape = %req.shape_id, "no canned output");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown shape_id {}", req.shape_id) })),
        ));
    };

    // Fail first N attempts to exercise retry handling.
    let output = if attempt <= state.fail_attempts {
        info!(attempt, "returning invalid JSON");
        r#"{"invalid": "json", missing_fields: true}"#.to_string()
    } else {
        valid.to_string()
    };

    Ok(Json(LlmResponse { output }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("MOCK_LLM_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8081);
    let fail_attempts = std::env::var("MOCK_LLM_FAIL_ATTEMPTS")
        .ok()
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(0);

    let state = AppState {
        attempt_count: Arc::new(AtomicUsize::new(0)),
        fail_attempts,
    };
    let app = Router::new()
        .route("/llm", post(generate))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("mock LLM server listening on http://{addr}/llm");
    info!("will fail the first {fail_attempts} attempt(s)");

    axum::serve(listener, app).await?;
    Ok(())
}
