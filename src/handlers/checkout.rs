use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;
use validator::Validate;

use crate::{
    errors::ApiError,
    handlers::common::{json_body, validate_input},
    services::{CartLine, CheckoutSummary},
    AppState,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSummaryRequest {
    #[validate(length(min = 1, max = 200))]
    pub customer_address: String,
    #[validate(length(min = 1, max = 50))]
    pub items: Vec<CartLine>,
}

#[instrument(skip(state, payload))]
async fn checkout_summary(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutSummaryRequest>, JsonRejection>,
) -> Result<Json<CheckoutSummary>, ApiError> {
    let request = json_body(payload)?;
    validate_input(&request)?;

    let summary = state
        .checkout
        .summarize(&request.customer_address, &request.items)
        .await?;
    Ok(Json(summary))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/summary", post(checkout_summary))
}
