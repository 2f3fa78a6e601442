use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::pipeline::InpaintError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Decode,
    Geometry,
    ModelUnavailable,
    Inference,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    pub error_kind: ErrorKind,
    pub error_code: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: message.into(),
            error_kind: kind,
            error_code: code.into(),
        }),
    )
}

pub fn validation_error(message: impl Into<String>) -> ApiError {
    error_response(
        StatusCode::BAD_REQUEST,
        ErrorKind::Validation,
        "validation_error",
        message,
    )
}

/// 503 means the model could not be brought up at all; every other pipeline
/// failure after that point is a 500 for this request only.
pub fn map_inpaint_error(err: &InpaintError) -> ApiError {
    match err {
        InpaintError::InvalidParameters(message) => validation_error(message.as_str()),
        InpaintError::ModelUnavailable(source) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ModelUnavailable,
            err.kind(),
            format!("Model not available: {source}"),
        ),
        InpaintError::Decode { .. } => pipeline_failure(ErrorKind::Decode, err),
        InpaintError::Geometry(_) => pipeline_failure(ErrorKind::Geometry, err),
        InpaintError::Inference(_) => pipeline_failure(ErrorKind::Inference, err),
        InpaintError::Encode(_) => pipeline_failure(ErrorKind::Internal, err),
    }
}

pub fn internal_error(message: impl Into<String>) -> ApiError {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Internal,
        "internal_error",
        "Internal server error",
    )
}

/// Body parse failures keep the structured shape. Syntax and type errors are a
/// 400; oversized bodies and a missing JSON content type keep axum's status.
pub fn json_rejection_error(rejection: &JsonRejection) -> ApiError {
    let status = match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        StatusCode::UNSUPPORTED_MEDIA_TYPE => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(
        status,
        ErrorKind::Validation,
        "invalid_json",
        format!("Invalid JSON body: {}", rejection.body_text()),
    )
}

pub fn into_response(err: ApiError) -> Response {
    err.into_response()
}

fn pipeline_failure(kind: ErrorKind, err: &InpaintError) -> ApiError {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        kind,
        err.kind(),
        format!("Inpainting failed: {err}"),
    )
}
