use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

use crate::delivery::{QuoteEngine, QuoteResponse};
use crate::errors::ServiceError;

const MAX_UNIT_PRICE: Decimal = dec!(10000);

/// One menu item in the basket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CartLine {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[validate(custom = "validate_unit_price")]
    pub unit_price: Decimal,
    #[validate(range(min = 1, max = 100))]
    pub quantity: u32,
}

impl CartLine {
    /// `None` if the product overflows.
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

fn validate_unit_price(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() || *value > MAX_UNIT_PRICE {
        let mut err = ValidationError::new("unit_price");
        err.message = Some("must be between 0 and 10000".into());
        return Err(err);
    }
    Ok(())
}

/// Totals and ETA shown on the order confirmation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutSummary {
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub delivery_fee: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub prep_minutes: u32,
    pub travel_minutes: Option<u32>,
    pub eta_minutes: u32,
    pub quote: QuoteResponse,
}

/// Re-quotes delivery at order time so the charged fee matches the address
/// actually submitted, not whatever the checkout form last displayed.
#[derive(Clone)]
pub struct CheckoutService {
    quotes: Arc<QuoteEngine>,
}

impl CheckoutService {
    pub fn new(quotes: Arc<QuoteEngine>) -> Self {
        Self { quotes }
    }

    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn summarize(
        &self,
        address: &str,
        items: &[CartLine],
    ) -> Result<CheckoutSummary, ServiceError> {
        let subtotal = subtotal(items)?;

        let quote = self.quotes.quote(address).await?;
        let total = subtotal
            .checked_add(quote.cost)
            .ok_or_else(order_too_large)?;

        info!(
            %subtotal,
            delivery_fee = %quote.cost,
            eta_minutes = quote.total_duration_minutes,
            "checkout summarized"
        );

        Ok(CheckoutSummary {
            subtotal,
            delivery_fee: quote.cost,
            total,
            prep_minutes: quote.cooking_minutes,
            travel_minutes: quote.travel_minutes,
            eta_minutes: quote.total_duration_minutes,
            quote: QuoteResponse::from(&quote),
        })
    }
}

fn order_too_large() -> ServiceError {
    ServiceError::ValidationError("Order total is too large".to_string())
}

/// Validates every line and sums them without overflowing.
fn subtotal(items: &[CartLine]) -> Result<Decimal, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError("Cart is empty".to_string()));
    }
    let mut subtotal = Decimal::ZERO;
    for line in items {
        if line.name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Every item needs a name".to_string(),
            ));
        }
        line.validate().map_err(|e| {
            ServiceError::ValidationError(format!("Invalid item {:?}: {}", line.name, e))
        })?;
        subtotal = line
            .line_total()
            .and_then(|total| subtotal.checked_add(total))
            .ok_or_else(order_too_large)?;
    }
    Ok(subtotal)
}
