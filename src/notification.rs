//! User-facing failure notices.
//!
//! Every failed request ends as one [`Notification`] naming the operation
//! that failed. Model-side problems get a generic "try again" message; the
//! detail goes to the log instead.

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use crate::flow::FlowError;
use crate::forms::FieldError;
use crate::shapes;
use crate::storage::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub kind: &'static str,
}

pub type ApiError = (StatusCode, Json<Notification>);

/// What the user was trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SymptomAnalysis,
    RiskScore,
    Transcription,
    XrayAnalysis,
    Upload,
    Download,
    ListFiles,
    Share,
    RunFlow,
}

impl Operation {
    pub fn for_flow(flow_id: &str) -> Self {
        match flow_id {
            shapes::symptom_analysis::ID => Operation::SymptomAnalysis,
            shapes::risk_score::ID => Operation::RiskScore,
            shapes::clinical_transcription::ID => Operation::Transcription,
            shapes::xray_analysis::ID => Operation::XrayAnalysis,
            _ => Operation::RunFlow,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Operation::SymptomAnalysis | Operation::XrayAnalysis => "Analysis Failed",
            Operation::RiskScore => "Calculation Failed",
            Operation::Transcription => "Transcription Failed",
            Operation::Upload => "Upload failed",
            Operation::Download => "Download failed",
            Operation::ListFiles => "Error fetching files",
            Operation::Share => "Invalid share link",
            Operation::RunFlow => "Request Failed",
        }
    }

    fn retry_message(self) -> &'static str {
        match self {
            Operation::SymptomAnalysis => {
                "There was a problem analyzing your symptoms. Please try again."
            }
            Operation::RiskScore => {
                "There was a problem calculating the risk score. Please try again."
            }
            Operation::Transcription => "Could not transcribe the audio. Please try again.",
            Operation::XrayAnalysis => "There was a problem analyzing the X-ray. Please try again.",
            _ => "Something went wrong. Please try again.",
        }
    }
}

fn notice(
    status: StatusCode,
    op: Operation,
    kind: &'static str,
    description: impl Into<String>,
) -> ApiError {
    (
        status,
        Json(Notification {
            title: op.title().to_string(),
            description: description.into(),
            kind,
        }),
    )
}

pub fn flow_failure(op: Operation, err: &FlowError) -> ApiError {
    match err {
        FlowError::Validation(_) => notice(StatusCode::BAD_REQUEST, op, err.kind(), err.to_string()),
        FlowError::UnknownFlow(id) => notice(
            StatusCode::NOT_FOUND,
            op,
            err.kind(),
            format!("No flow named '{id}'."),
        ),
        FlowError::ModelInvocation(_) | FlowError::ModelOutput { .. } => {
            error!(kind = err.kind(), "{}: {err}", op.title());
            notice(StatusCode::BAD_GATEWAY, op, err.kind(), op.retry_message())
        }
    }
}

pub fn form_failure(op: Operation, errors: &[FieldError]) -> ApiError {
    let description = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    notice(StatusCode::BAD_REQUEST, op, "validation", description)
}

pub fn storage_failure(op: Operation, err: &StorageError) -> ApiError {
    let (status, kind) = match err {
        StorageError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        StorageError::InvalidName(_) => (StatusCode::BAD_REQUEST, "invalid_name"),
        StorageError::Disabled => (StatusCode::SERVICE_UNAVAILABLE, "disabled"),
        StorageError::Backend(_) | StorageError::Io(_) => (StatusCode::BAD_GATEWAY, "storage"),
    };
    if status == StatusCode::BAD_GATEWAY {
        error!("{}: {err}", op.title());
    } else {
        warn!("{}: {err}", op.title());
    }
    notice(status, op, kind, err.to_string())
}

pub fn bad_request(op: Operation, description: impl Into<String>) -> ApiError {
    notice(StatusCode::BAD_REQUEST, op, "bad_request", description)
}

pub fn share_denied() -> ApiError {
    notice(
        StatusCode::NOT_FOUND,
        Operation::Share,
        "share_denied",
        "This share link is not valid.",
    )
}
