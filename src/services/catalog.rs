//! Read-only product catalog, as maintained from the admin product list.

use crate::domain::aggregates::product::Product;
use crate::storage::{keys, load_or_default, KeyValueStore};

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self { Self { products } }

    pub fn load(store: &dyn KeyValueStore) -> Self {
        Self::new(load_or_default(store, keys::PRODUCTS))
    }

    pub fn products(&self) -> &[Product] { &self.products }
    pub fn find(&self, id: &str) -> Option<&Product> { self.products.iter().find(|p| p.id == id) }
    pub fn find_by_slug(&self, slug: &str) -> Option<&Product> { self.products.iter().find(|p| p.slug == slug) }
}
