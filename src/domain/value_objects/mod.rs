//! Value Objects for the storefront

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a cart line: a product plus an optional variant.
///
/// Two lines with equal keys are the same line; adding one merges into the other.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineItemKey {
    product_id: String,
    variant_id: Option<String>,
}

impl LineItemKey {
    pub fn new(product_id: impl Into<String>, variant_id: Option<&str>) -> Self {
        Self { product_id: product_id.into(), variant_id: variant_id.map(str::to_owned) }
    }

    pub fn product(product_id: impl Into<String>) -> Self {
        Self { product_id: product_id.into(), variant_id: None }
    }

    pub fn product_id(&self) -> &str { &self.product_id }
    pub fn variant_id(&self) -> Option<&str> { self.variant_id.as_deref() }

    /// Deterministic string form of the key.
    ///
    /// Encoded as a JSON pair so that `("a::b", None)` and `("a", Some("b"))` never collide.
    pub fn as_string(&self) -> String {
        serde_json::json!([self.product_id, self.variant_id]).to_string()
    }
}

impl fmt::Display for LineItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant_id {
            Some(variant) => write!(f, "{}/{}", self.product_id, variant),
            None => write!(f, "{}", self.product_id),
        }
    }
}

/// Composite identity string for a product and optional variant.
pub fn line_item_identity(product_id: &str, variant_id: Option<&str>) -> String {
    LineItemKey::new(product_id, variant_id).as_string()
}

/// Quantity of a cart line, never below one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);

    pub fn new(value: u32) -> Result<Self, QuantityError> {
        if value == 0 { return Err(QuantityError::Zero); }
        Ok(Self(value))
    }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0)) }
}

impl TryFrom<u32> for Quantity {
    type Error = QuantityError;
    fn try_from(value: u32) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> Self { q.0 }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum QuantityError { Zero }
impl std::error::Error for QuantityError {}
impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Quantity must be at least 1") }
}

/// Percentage saved against a compare-at price, rounded half away from zero.
///
/// `None` when there is no compare-at price or it does not exceed `price`.
pub fn discount_percentage(price: Decimal, compare_at_price: Option<Decimal>) -> Option<u32> {
    let compare_at = compare_at_price?;
    if compare_at <= price || compare_at <= Decimal::ZERO { return None; }
    let pct = Decimal::ONE_HUNDRED * (compare_at - price) / compare_at;
    pct.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_u32()
}

/// Renders an amount with exactly two decimals, prefixed by the currency symbol.
pub fn format_price(amount: Decimal, currency_symbol: &str) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{}{:.2}", currency_symbol, rounded)
}

/// Converts a major-unit amount to minor units (cents), rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
