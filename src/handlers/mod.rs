pub mod checkout;
pub mod common;
pub mod delivery;
pub mod health;
