//! Storefront core
//!
//! Cart, checkout, order and appointment booking state for a small business
//! storefront.
//!
//! ## Features
//! - Shopping cart with product/variant line identity and persisted state
//! - Four-step checkout with card, cash-on-delivery and PayPal payment
//! - Admin order list: filtering, sorting, status transitions, CSV export
//! - Appointment booking against staff hours and existing appointments

pub mod config;
pub mod domain;
pub mod payment;
pub mod services;
pub mod storage;

use thiserror::Error;

pub use domain::aggregates::effective_price;
pub use domain::value_objects::{discount_percentage, format_price, line_item_identity};

use config::ConfigError;
use domain::aggregates::{BookingError, CartError, CheckoutError, OrderError};
use domain::value_objects::QuantityError;
use payment::PaymentError;
use storage::StorageError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error("Product {0} not found")]
    ProductNotFound(String),

    #[error(transparent)]
    Quantity(#[from] QuantityError),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, StorefrontError>;
