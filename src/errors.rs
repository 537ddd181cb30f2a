use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::delivery::QuoteError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// JSON body of every error response.
///
/// `error` carries the human-readable message so checkout clients can show it
/// verbatim (for example the "we do not deliver" notice).
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// HTTP status code.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp of when the error was produced.
    pub timestamp: String,
}

impl ErrorResponse {
    fn new(status: StatusCode, error: String) -> Self {
        Self {
            error,
            status: status.as_u16(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The address is valid but cannot be served. The message is shown to
    /// customers as-is.
    #[error("{0}")]
    DeliveryUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<QuoteError> for ServiceError {
    fn from(err: QuoteError) -> Self {
        match err {
            QuoteError::InvalidAddress(msg) => ServiceError::ValidationError(msg),
            QuoteError::Rejected(rejection) => {
                ServiceError::DeliveryUnavailable(rejection.to_string())
            }
        }
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::DeliveryUnavailable(_) => StatusCode::BAD_REQUEST,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for HTTP responses. Internal failures are reported
    /// generically.
    pub fn response_message(&self) -> String {
        match self {
            Self::ValidationError(msg) | Self::DeliveryUnavailable(msg) => msg.clone(),
            Self::ConfigurationError(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse::new(status, self.response_message());
        (status, Json(body)).into_response()
    }
}

/// Errors raised at the HTTP edge before a service is reached.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::ServiceError(service_error) => return service_error.into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };
        (status, Json(ErrorResponse::new(status, message))).into_response()
    }
}
