use crate::errors::ApiError;
use axum::{extract::rejection::JsonRejection, Json};
use validator::Validate;

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation failed: {}", e)))
}

/// Unwraps a JSON body, reporting malformed payloads in the standard error shape.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}
