//! Domain events
use crate::domain::aggregates::booking::BookingReference;
use crate::domain::aggregates::order::{OrderStatus, PaymentStatus};
use crate::domain::value_objects::{LineItemKey, Quantity};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "event", rename_all = "camelCase")]
pub enum DomainEvent {
    Cart(CartEvent),
    Checkout(CheckoutEvent),
    Order(OrderEvent),
    Booking(BookingEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CartEvent {
    ItemAdded { key: LineItemKey, quantity: Quantity },
    ItemRemoved { key: LineItemKey },
    QuantityUpdated { key: LineItemKey, quantity: Quantity },
    Cleared,
    /// Presentation layers open the cart drawer on this.
    OpenRequested,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckoutEvent {
    StepChanged { step: crate::domain::aggregates::checkout::CheckoutStep },
    PaymentIntentRequested { amount: Decimal },
    PaymentIntentFailed { reason: String },
    Completed { order_number: String, total: Decimal },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderEvent {
    Created { order_id: String, order_number: String, total: Decimal },
    StatusChanged { order_id: String, from: OrderStatus, to: OrderStatus },
    PaymentStatusChanged { order_id: String, from: PaymentStatus, to: PaymentStatus },
    Deleted { order_id: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BookingEvent {
    Confirmed { reference: BookingReference, staff_id: String },
}
