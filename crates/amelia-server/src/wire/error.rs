//! The single `OrchestratorError -> HTTP` mapping (spec §4.5, §7). Every
//! handler returns `Result<_, AppError>` and lets this be the only place an
//! error becomes a status code and a JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use amelia_core::OrchestratorError;

pub struct AppError(OrchestratorError);

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match &self.0 {
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::WorktreeConflict { .. } | OrchestratorError::RunnerConflict(_) => {
                StatusCode::CONFLICT
            }
            OrchestratorError::InvalidState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::ConcurrencyLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let details = match &self.0 {
            OrchestratorError::Infrastructure(err) => {
                tracing::error!("infrastructure error: {err:#}");
                None
            }
            other => Some(serde_json::json!({ "detail": other.to_string() })),
        };

        let body = ErrorBody {
            error: self.0.to_string(),
            code,
            details,
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert("Retry-After", "30".parse().expect("static header value"));
        }
        response
    }
}
