//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::cart::CartLine;
use crate::domain::aggregates::checkout::{PaymentMethod, ShippingMethod};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Quantity;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: String,
    order_number: String,
    customer: CustomerInfo,
    items: Vec<OrderItem>,
    totals: OrderTotals,
    currency: String,
    status: OrderStatus,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    #[serde(default)]
    payment_id: Option<String>,
    shipping_method: ShippingMethod,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub address: Address,
}

impl CustomerInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// Frozen copy of the product fields shown on an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub product_id: String,
    pub title: String,
    pub slug: String,
    pub price: Decimal,
    pub currency: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product: ProductSnapshot,
    #[serde(default)]
    pub variant_name: Option<String>,
    pub quantity: Quantity,
    /// Unit price charged, variant price included.
    pub price: Decimal,
}

impl OrderItem {
    pub fn from_cart_line(line: &CartLine) -> Self {
        let p = &line.product;
        Self {
            product: ProductSnapshot {
                product_id: p.id.clone(), title: p.title.clone(), slug: p.slug.clone(),
                price: p.price, currency: p.currency.clone(),
                image: p.primary_image().map(|i| i.url.clone()),
            },
            variant_name: line.variant.as_ref().map(|v| v.name.clone()),
            quantity: line.quantity,
            price: line.unit_price(),
        }
    }

    pub fn total(&self) -> Decimal { self.price * Decimal::from(self.quantity.value()) }
}

/// Monetary totals of an order. `total` is always `subtotal + tax + shipping - discount`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTotals")]
pub struct OrderTotals {
    subtotal: Decimal,
    tax: Decimal,
    shipping: Decimal,
    discount: Decimal,
    total: Decimal,
}

#[derive(Deserialize)]
struct RawTotals { subtotal: Decimal, tax: Decimal, shipping: Decimal, discount: Decimal, total: Decimal }

impl OrderTotals {
    pub fn new(subtotal: Decimal, tax: Decimal, shipping: Decimal, discount: Decimal) -> Self {
        Self { subtotal, tax, shipping, discount, total: subtotal + tax + shipping - discount }
    }
    pub fn subtotal(&self) -> Decimal { self.subtotal }
    pub fn tax(&self) -> Decimal { self.tax }
    pub fn shipping(&self) -> Decimal { self.shipping }
    pub fn discount(&self) -> Decimal { self.discount }
    pub fn total(&self) -> Decimal { self.total }
}

impl TryFrom<RawTotals> for OrderTotals {
    type Error = OrderError;
    fn try_from(raw: RawTotals) -> Result<Self, Self::Error> {
        let totals = Self::new(raw.subtotal, raw.tax, raw.shipping, raw.discount);
        if totals.total != raw.total {
            return Err(OrderError::TotalMismatch { expected: totals.total, found: raw.total });
        }
        Ok(totals)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Processing, Completed, Shipped, Delivered, Cancelled, Refunded }

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        Self::Pending, Self::Processing, Self::Completed, Self::Shipped,
        Self::Delivered, Self::Cancelled, Self::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Processing => "processing", Self::Completed => "completed",
            Self::Shipped => "shipped", Self::Delivered => "delivered", Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Whether an admin may move an order from `self` to `to`.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        if *self == to { return true; }
        matches!(
            (self, to),
            (Pending, Processing | Completed | Cancelled)
                | (Processing, Completed | Shipped | Cancelled)
                | (Completed, Shipped | Refunded)
                | (Shipped, Delivered)
                | (Delivered, Refunded)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Processing, Completed, Failed, Refunded }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Processing => "processing", Self::Completed => "completed",
            Self::Failed => "failed", Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Everything needed to place an order.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub order_number: String,
    pub customer: CustomerInfo,
    pub items: Vec<OrderItem>,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub currency: String,
    pub shipping_method: ShippingMethod,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_id: Option<String>,
    pub notes: Option<String>,
}

impl Order {
    pub fn place(new: NewOrder) -> Result<Self, OrderError> {
        if new.items.is_empty() { return Err(OrderError::NoItems); }
        let subtotal = new.items.iter().map(OrderItem::total).sum();
        let totals = OrderTotals::new(subtotal, new.tax, new.shipping, new.discount);
        let id = Uuid::now_v7().to_string();
        let now = Utc::now();
        let mut order = Self {
            id: id.clone(), order_number: new.order_number, customer: new.customer, items: new.items,
            totals, currency: new.currency, status: OrderStatus::Pending,
            payment_method: new.payment_method, payment_status: new.payment_status, payment_id: new.payment_id,
            shipping_method: new.shipping_method, created_at: now, updated_at: now, notes: new.notes,
            events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Created {
            order_id: id, order_number: order.order_number.clone(), total: order.totals.total,
        }));
        Ok(order)
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn customer(&self) -> &CustomerInfo { &self.customer }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn totals(&self) -> &OrderTotals { &self.totals }
    pub fn total(&self) -> Decimal { self.totals.total }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn payment_id(&self) -> Option<&str> { self.payment_id.as_deref() }
    pub fn shipping_method(&self) -> ShippingMethod { self.shipping_method }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn notes(&self) -> Option<&str> { self.notes.as_deref() }

    pub fn set_status(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        let from = self.status;
        if !from.can_transition_to(to) { return Err(OrderError::IllegalTransition { from, to }); }
        self.status = to;
        self.updated_at = now;
        if from != to {
            self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id.clone(), from, to }));
        }
        Ok(())
    }

    pub fn set_payment_status(&mut self, to: PaymentStatus, now: DateTime<Utc>) {
        let from = self.payment_status;
        self.payment_status = to;
        self.updated_at = now;
        if from != to {
            self.raise_event(DomainEvent::Order(OrderEvent::PaymentStatusChanged { order_id: self.id.clone(), from, to }));
        }
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, created_at: DateTime<Utc>) { self.created_at = created_at; }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Order has no items")]
    NoItems,
    #[error("Order {0} not found")]
    NotFound(String),
    #[error("Cannot move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    #[error("Order total {found} does not match computed total {expected}")]
    TotalMismatch { expected: Decimal, found: Decimal },
}
