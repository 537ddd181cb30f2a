use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;
use validator::Validate;

use crate::{
    delivery::QuoteResponse,
    errors::{ApiError, ServiceError},
    handlers::common::{json_body, validate_input},
    AppState,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CalculateDeliveryRequest {
    /// Missing and blank addresses are reported by the quote engine.
    #[serde(default)]
    #[validate(length(max = 200))]
    pub customer_address: Option<String>,
}

#[instrument(skip(state, payload))]
async fn calculate_delivery(
    State(state): State<AppState>,
    payload: Result<Json<CalculateDeliveryRequest>, JsonRejection>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let request = json_body(payload)?;
    validate_input(&request)?;

    let address = request.customer_address.unwrap_or_default();
    let quote = state
        .quotes
        .quote(&address)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(QuoteResponse::from(&quote)))
}

pub fn delivery_routes() -> Router<AppState> {
    Router::new().route("/calculate", post(calculate_delivery))
}
