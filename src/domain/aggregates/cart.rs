//! Cart Aggregate

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::domain::aggregates::product::{Product, ProductVariant};
use crate::domain::events::{CartEvent, DomainEvent};
use crate::domain::value_objects::{LineItemKey, Quantity};

/// One product (and optional variant) with a quantity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product: Product,
    pub quantity: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<ProductVariant>,
}

impl CartLine {
    pub fn key(&self) -> LineItemKey {
        LineItemKey::new(self.product.id.as_str(), self.variant.as_ref().map(|v| v.id.as_str()))
    }
    pub fn unit_price(&self) -> Decimal { effective_price(self) }
    pub fn line_total(&self) -> Decimal { self.unit_price() * Decimal::from(self.quantity.value()) }
}

/// Variant price when a variant is selected, product price otherwise.
pub fn effective_price(line: &CartLine) -> Decimal {
    line.variant.as_ref().map_or(line.product.price, |v| v.price)
}

/// Ordered cart lines, at most one per [`LineItemKey`].
#[derive(Clone, Debug, Default)]
pub struct Cart {
    lines: Vec<CartLine>,
    events: Vec<DomainEvent>,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    /// Rebuilds a cart from persisted lines, merging any duplicate identities.
    pub fn from_lines(lines: Vec<CartLine>) -> Self {
        let mut cart = Self::new();
        for line in lines { cart.merge(line); }
        cart
    }

    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn line(&self, key: &LineItemKey) -> Option<&CartLine> { self.lines.iter().find(|l| &l.key() == key) }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    /// Sum of quantities across all lines.
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity.value()).fold(0, u32::saturating_add)
    }

    pub fn subtotal(&self) -> Decimal { self.lines.iter().map(CartLine::line_total).sum() }

    pub fn add_item(&mut self, product: Product, quantity: Quantity, variant: Option<ProductVariant>) -> Result<(), CartError> {
        if let Some(v) = &variant {
            if product.variant(&v.id).is_none() {
                return Err(CartError::UnknownVariant { product_id: product.id, variant_id: v.id.clone() });
            }
        }
        if !product.is_purchasable(variant.as_ref()) {
            return Err(CartError::Unavailable(product.id));
        }
        let line = CartLine { product, quantity, variant };
        let key = line.key();
        self.merge(line);
        self.raise_event(DomainEvent::Cart(CartEvent::ItemAdded { key, quantity }));
        self.raise_event(DomainEvent::Cart(CartEvent::OpenRequested));
        Ok(())
    }

    /// Removes the matching line. Returns `false` when nothing matched.
    pub fn remove_item(&mut self, key: &LineItemKey) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| &l.key() != key);
        let removed = self.lines.len() != before;
        if removed { self.raise_event(DomainEvent::Cart(CartEvent::ItemRemoved { key: key.clone() })); }
        removed
    }

    /// Sets the quantity of a line; zero removes it. Returns `false` when nothing matched.
    pub fn update_quantity(&mut self, key: &LineItemKey, quantity: u32) -> bool {
        let Ok(quantity) = Quantity::new(quantity) else { return self.remove_item(key) };
        let Some(line) = self.lines.iter_mut().find(|l| &l.key() == key) else { return false };
        line.quantity = quantity;
        self.raise_event(DomainEvent::Cart(CartEvent::QuantityUpdated { key: key.clone(), quantity }));
        true
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.raise_event(DomainEvent::Cart(CartEvent::Cleared));
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }

    fn merge(&mut self, line: CartLine) {
        let key = line.key();
        if let Some(existing) = self.lines.iter_mut().find(|l| l.key() == key) {
            existing.quantity = existing.quantity.add(line.quantity);
        } else {
            self.lines.push(line);
        }
    }

    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("Product {0} is out of stock")]
    Unavailable(String),
    #[error("Variant {variant_id} does not belong to product {product_id}")]
    UnknownVariant { product_id: String, variant_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::fixtures::{product, variant};

    fn qty(n: u32) -> Quantity { Quantity::new(n).unwrap() }

    fn independent_subtotal(cart: &Cart) -> Decimal {
        cart.lines().iter().map(|l| effective_price(l) * Decimal::from(l.quantity.value())).sum()
    }

    #[test]
    fn test_same_identity_merges() {
        let mut cart = Cart::new();
        let p = product("A", Decimal::new(1899, 2));
        for n in [2, 3, 1] {
            cart.add_item(p.clone(), qty(n), None).unwrap();
            assert_eq!(cart.subtotal(), independent_subtotal(&cart));
        }
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity.value(), 6);
        assert_eq!(cart.item_count(), 6);
    }

    #[test]
    fn test_variants_are_separate_lines() {
        let mut cart = Cart::new();
        let mut p = product("A", Decimal::new(20, 0));
        p.variants = vec![variant("S", Decimal::new(22, 0)), variant("M", Decimal::new(24, 0))];
        cart.add_item(p.clone(), qty(1), None).unwrap();
        cart.add_item(p.clone(), qty(1), Some(p.variants[0].clone())).unwrap();
        cart.add_item(p.clone(), qty(2), Some(p.variants[1].clone())).unwrap();
        cart.add_item(p.clone(), qty(1), Some(p.variants[0].clone())).unwrap();
        assert_eq!(cart.lines().len(), 3);
        // 20 + 2*22 + 2*24
        assert_eq!(cart.subtotal(), Decimal::new(112, 0));
        assert_eq!(cart.subtotal(), independent_subtotal(&cart));
    }

    #[test]
    fn test_remove_then_add_starts_fresh() {
        let mut cart = Cart::new();
        let p = product("A", Decimal::new(10, 0));
        cart.add_item(p.clone(), qty(5), None).unwrap();
        assert!(cart.remove_item(&LineItemKey::product("A")));
        cart.add_item(p, qty(2), None).unwrap();
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity.value(), 2);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut cart = Cart::new();
        cart.add_item(product("A", Decimal::new(10, 0)), qty(1), None).unwrap();
        assert!(!cart.remove_item(&LineItemKey::new("A", Some("x"))));
        assert_eq!(cart.item_count(), 1);
    }

    #[test]
    fn test_update_quantity() {
        let mut cart = Cart::new();
        cart.add_item(product("A", Decimal::new(10, 0)), qty(1), None).unwrap();
        cart.add_item(product("B", Decimal::new(5, 0)), qty(1), None).unwrap();
        assert!(cart.update_quantity(&LineItemKey::product("A"), 4));
        assert_eq!(cart.subtotal(), Decimal::new(45, 0));
        assert!(cart.update_quantity(&LineItemKey::product("B"), 0));
        assert_eq!(cart.lines().len(), 1);
        assert!(!cart.update_quantity(&LineItemKey::product("C"), 2));
        assert_eq!(cart.subtotal(), independent_subtotal(&cart));
    }

    #[test]
    fn test_add_raises_open_request() {
        let mut cart = Cart::new();
        cart.add_item(product("A", Decimal::new(10, 0)), qty(1), None).unwrap();
        let events = cart.take_events();
        assert!(events.contains(&DomainEvent::Cart(CartEvent::OpenRequested)));
        assert!(cart.take_events().is_empty());
    }

    #[test]
    fn test_rejects_foreign_variant_and_out_of_stock() {
        let mut cart = Cart::new();
        let p = product("A", Decimal::new(10, 0));
        let err = cart.add_item(p.clone(), qty(1), Some(variant("Z", Decimal::ONE))).unwrap_err();
        assert!(matches!(err, CartError::UnknownVariant { .. }));
        let mut sold_out = p;
        sold_out.in_stock = false;
        assert_eq!(cart.add_item(sold_out, qty(1), None), Err(CartError::Unavailable("A".into())));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_from_lines_merges_duplicates() {
        let p = product("A", Decimal::new(10, 0));
        let line = CartLine { product: p, quantity: qty(2), variant: None };
        let cart = Cart::from_lines(vec![line.clone(), line]);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.item_count(), 4);
    }
}
