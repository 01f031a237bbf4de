//! Persisted cart

use rust_decimal::Decimal;
use tracing::{instrument, warn};
use crate::domain::aggregates::cart::{Cart, CartError, CartLine};
use crate::domain::aggregates::product::{Product, ProductVariant};
use crate::domain::value_objects::{LineItemKey, Quantity};
use crate::services::EventBus;
use crate::storage::{load_or_default, save, SharedStore};

/// A [`Cart`] bound to one storage key. Every mutation writes the full line list back.
#[derive(Debug)]
pub struct CartStore {
    store: SharedStore,
    key: String,
    cart: Cart,
    bus: EventBus,
}

impl CartStore {
    /// Loads the cart under `key`; absent or unreadable data yields an empty cart.
    pub fn open(store: SharedStore, key: impl Into<String>, bus: EventBus) -> Self {
        let key = key.into();
        let lines: Vec<CartLine> = load_or_default(store.as_ref(), &key);
        Self { store, key, cart: Cart::from_lines(lines), bus }
    }

    pub fn key(&self) -> &str { &self.key }
    pub fn cart(&self) -> &Cart { &self.cart }
    pub fn lines(&self) -> &[CartLine] { self.cart.lines() }
    pub fn item_count(&self) -> u32 { self.cart.item_count() }
    pub fn subtotal(&self) -> Decimal { self.cart.subtotal() }
    pub fn is_empty(&self) -> bool { self.cart.is_empty() }

    #[instrument(skip(self, product, variant), fields(cart = %self.key, product_id = %product.id))]
    pub fn add_item(&mut self, product: Product, quantity: Quantity, variant: Option<ProductVariant>) -> Result<(), CartError> {
        self.cart.add_item(product, quantity, variant)?;
        self.commit();
        Ok(())
    }

    /// Removes the matching line; a missing line is not an error.
    pub fn remove_item(&mut self, key: &LineItemKey) -> bool {
        let removed = self.cart.remove_item(key);
        if removed { self.commit(); }
        removed
    }

    /// Sets a line's quantity. Zero removes the line.
    pub fn update_quantity(&mut self, key: &LineItemKey, quantity: u32) -> bool {
        let changed = self.cart.update_quantity(key, quantity);
        if changed { self.commit(); }
        changed
    }

    pub fn clear(&mut self) {
        self.cart.clear();
        self.commit();
    }

    fn commit(&mut self) {
        if let Err(e) = save(self.store.as_ref(), &self.key, self.cart.lines()) {
            warn!(cart = %self.key, error = %e, "failed to persist cart");
        }
        self.bus.publish(self.cart.take_events());
    }
}
