use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<nshift_orchestrator::OrchestrateError> for ApiError {
    fn from(e: nshift_orchestrator::OrchestrateError) -> Self {
        match e {
            nshift_orchestrator::OrchestrateError::ScheduleNotFound => ApiError::not_found(e.to_string()),
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<nshift_store::StoreError> for ApiError {
    fn from(e: nshift_store::StoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<nshift_config::ConfigError> for ApiError {
    fn from(e: nshift_config::ConfigError) -> Self {
        ApiError::internal(e.to_string())
    }
}
