//! Product read model
//!
//! Products are owned by the catalog; the cart and checkout only read them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::discount_percentage;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    #[serde(default)]
    pub compare_at_price: Option<Decimal>,
    /// Currency symbol used when rendering prices, e.g. `€`.
    pub currency: String,
    #[serde(default)]
    pub images: Vec<ProductImage>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
    pub in_stock: bool,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub review_count: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub compare_at_price: Option<Decimal>,
    pub sku: String,
    pub stock_quantity: u32,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    pub url: String,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl Product {
    pub fn variant(&self, variant_id: &str) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    pub fn default_variant(&self) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| v.is_default).or_else(|| self.variants.first())
    }

    /// The image flagged primary, falling back to the first image.
    pub fn primary_image(&self) -> Option<&ProductImage> {
        self.images.iter().find(|i| i.is_primary).or_else(|| self.images.first())
    }

    pub fn discount_percentage(&self) -> Option<u32> {
        discount_percentage(self.price, self.compare_at_price)
    }

    /// Whether the product (or the given variant) can be put in a cart.
    pub fn is_purchasable(&self, variant: Option<&ProductVariant>) -> bool {
        self.in_stock && variant.map_or(true, |v| v.stock_quantity > 0)
    }
}

impl ProductVariant {
    pub fn discount_percentage(&self) -> Option<u32> {
        discount_percentage(self.price, self.compare_at_price)
    }
}
