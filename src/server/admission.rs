//! Dispatch event admission endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::core::{PipelineError, INVALID_JSON_PREFIX};

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        match self {
            PipelineError::Validation { missing_fields } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "error": "Validation Failed",
                    "missingFields": missing_fields,
                })),
            )
                .into_response(),

            PipelineError::Conflict { key } => (
                StatusCode::CONFLICT,
                Json(json!({ "error": "Conflict", "key": key })),
            )
                .into_response(),

            other => {
                error!(error = %other, "Admission failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal Server Error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Admission handler.
///
/// - 200 with `{"message", "key"}` once the event is stored
/// - 422 with the missing-field list
/// - 409 when an event with the same key was already admitted
/// - 500 when storage fails
pub async fn admission_handler(
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, PipelineError> {
    let raw = std::str::from_utf8(&body).map_err(|e| PipelineError::Validation {
        missing_fields: vec![format!("{}{}", INVALID_JSON_PREFIX, e)],
    })?;

    let key = app_state.gate().submit(raw).await?;

    Ok(Json(json!({
        "message": format!("JSON file {} stored successfully.", key),
        "key": key,
    })))
}
