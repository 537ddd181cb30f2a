pub mod checkout;

pub use checkout::{CartLine, CheckoutService, CheckoutSummary};
