//! Error responses returned to the proxy client

use crate::proxy::types::ProxyError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Unique error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Extension trait for consistent error formatting
pub trait ErrorResponseExt {
    fn to_error_response(&self) -> ErrorResponse;

    fn status_code(&self) -> StatusCode;
}

impl ErrorResponseExt for ProxyError {
    fn to_error_response(&self) -> ErrorResponse {
        use ProxyError::*;

        let code = match self {
            RequestTimeout(_) => "GATEWAY_TIMEOUT",
            InvalidTargetUrl(_) => "INVALID_TARGET_URL",
            MissingTarget(_) => "MISSING_TARGET",
            Upstream(_) => "CONNECTION_ERROR",
            AlreadyListening(_) | IoError(_) => "INTERNAL_ERROR",
        };
        ErrorResponse::new(code, self.to_string())
    }

    fn status_code(&self) -> StatusCode {
        use ProxyError::*;

        match self {
            RequestTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            InvalidTargetUrl(_) | MissingTarget(_) => StatusCode::BAD_REQUEST,
            Upstream(_) => StatusCode::BAD_GATEWAY,
            AlreadyListening(_) | IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        self.to_error_response().into_response_with_status(status)
    }
}
