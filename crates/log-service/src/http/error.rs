//! Error responses for the HTTP API.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log_service_core::LogServiceError;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

/// Envelope for every JSON body the HTTP API returns outside of raw entries.
#[derive(Debug, Serialize)]
pub struct JsonResponse {
    pub error: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonResponse {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            error: false,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            data: None,
        }
    }
}

/// A failed request, reported to its own caller only.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LogServiceError> for ApiError {
    fn from(err: LogServiceError) -> Self {
        let status = match &err {
            LogServiceError::EntryNotFound { .. } => StatusCode::NOT_FOUND,
            LogServiceError::InvalidParams { .. }
            | LogServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
            e if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("HTTP request failed: {}", err);
        } else {
            warn!("HTTP request rejected: {}", err);
        }

        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(JsonResponse::failure(self.message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = ApiError::from(LogServiceError::EntryNotFound { id: "x".into() });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let bad = ApiError::from(LogServiceError::InvalidParams {
            message: "missing name".into(),
        });
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let down = ApiError::from(LogServiceError::StoreDisconnected);
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);

        let corrupt = ApiError::from(LogServiceError::corrupt_record("x", "missing field"));
        assert_eq!(corrupt.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let other = ApiError::from(LogServiceError::Other("boom".into()));
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_failure_envelope_omits_data() {
        let body = serde_json::to_value(JsonResponse::failure("nope")).unwrap();
        assert_eq!(body["error"], true);
        assert_eq!(body["message"], "nope");
        assert!(body.get("data").is_none());
    }
}
