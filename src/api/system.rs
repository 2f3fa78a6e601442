use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::api::error::{error_response, ErrorKind};
use crate::api::server::AppState;
use crate::model::catalog::known_models;

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "model": state.model_id(),
            "model_loaded": state.orchestrator.model().is_loaded(),
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "route_count": state.route_count,
        })),
    )
}

pub async fn list_models_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "current_model": state.model_id(),
            "available_models": known_models(),
        })),
    )
}

pub async fn not_found_handler(OriginalUri(uri): OriginalUri) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorKind::Validation,
        "not_found",
        format!("No handler for {uri}"),
    )
    .into_response()
}
