//! Admin order list
//!
//! Filtering, sorting and aggregates are pure views over the stored orders; only
//! [`OrderStore::insert`], the status setters and [`OrderStore::delete`] mutate.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use crate::domain::aggregates::order::{Order, OrderError, OrderStatus, PaymentStatus};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::services::EventBus;
use crate::storage::{keys, load_or_default, save, SharedStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecencyWindow { Today, Week, Month, Year }

impl RecencyWindow {
    pub fn contains(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let days = match self {
            Self::Today => return created_at.date_naive() == now.date_naive(),
            Self::Week => 7,
            Self::Month => 30,
            Self::Year => 365,
        };
        created_at >= now - Duration::days(days)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    /// Case-insensitive substring of order number, customer name or email.
    pub search: Option<String>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub window: Option<RecencyWindow>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order, now: DateTime<Utc>) -> bool {
        if let Some(needle) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            let customer = order.customer();
            let hit = [order.order_number().to_string(), customer.full_name(), customer.email.clone()]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit { return false; }
        }
        self.status.map_or(true, |s| order.status() == s)
            && self.payment_status.map_or(true, |s| order.payment_status() == s)
            && self.window.map_or(true, |w| w.contains(order.created_at(), now))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey { #[default] Date, Total, Status }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection { Asc, #[default] Desc }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSort {
    #[serde(default)]
    pub by: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

pub fn filter_orders<'a>(orders: &'a [Order], filter: &OrderFilter, now: DateTime<Utc>) -> Vec<&'a Order> {
    orders.iter().filter(|o| filter.matches(o, now)).collect()
}

/// Sorts a view; ties fall back to order number so the result is deterministic.
pub fn sort_orders<'a>(mut orders: Vec<&'a Order>, sort: OrderSort) -> Vec<&'a Order> {
    orders.sort_by(|a, b| {
        let primary = match sort.by {
            SortKey::Date => a.created_at().cmp(&b.created_at()),
            SortKey::Total => a.total().cmp(&b.total()),
            SortKey::Status => a.status().cmp(&b.status()),
        };
        let ordering = primary.then_with(|| a.order_number().cmp(b.order_number()));
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
    orders
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub count: usize,
    pub revenue: Decimal,
    pub average_order_value: Decimal,
}

impl OrderStats {
    pub fn of<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let (count, revenue) = orders.into_iter().fold((0usize, Decimal::ZERO), |(n, sum), o| (n + 1, sum + o.total()));
        let average_order_value = match count {
            0 => Decimal::ZERO,
            n => (revenue / Decimal::from(n)).round_dp(2),
        };
        Self { count, revenue, average_order_value }
    }
}

#[derive(Debug)]
pub struct OrderStore {
    store: SharedStore,
    orders: Vec<Order>,
    bus: EventBus,
}

impl OrderStore {
    pub fn open(store: SharedStore, bus: EventBus) -> Self {
        let orders = load_or_default(store.as_ref(), keys::ORDERS);
        Self { store, orders, bus }
    }

    pub fn orders(&self) -> &[Order] { &self.orders }
    pub fn get(&self, id: &str) -> Option<&Order> { self.orders.iter().find(|o| o.id() == id) }
    pub fn len(&self) -> usize { self.orders.len() }
    pub fn is_empty(&self) -> bool { self.orders.is_empty() }

    /// Filtered and sorted view.
    pub fn query(&self, filter: &OrderFilter, sort: OrderSort, now: DateTime<Utc>) -> Vec<&Order> {
        sort_orders(filter_orders(&self.orders, filter, now), sort)
    }

    pub fn stats(&self) -> OrderStats { OrderStats::of(&self.orders) }

    /// A fresh `ORD-########` number not used by any stored order.
    pub fn next_order_number(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = format!("ORD-{:08}", rng.gen_range(0..100_000_000u32));
            if self.orders.iter().all(|o| o.order_number() != candidate) { return candidate; }
        }
    }

    #[instrument(skip_all, fields(order_number = %order.order_number()))]
    pub fn insert(&mut self, mut order: Order) {
        let events = order.take_events();
        self.orders.push(order);
        self.commit(events);
        info!("order stored");
    }

    #[instrument(skip(self))]
    pub fn set_status(&mut self, order_id: &str, status: OrderStatus) -> Result<&Order, OrderError> {
        let index = self.position(order_id)?;
        let events = {
            let order = &mut self.orders[index];
            order.set_status(status, Utc::now())?;
            order.take_events()
        };
        self.commit(events);
        Ok(&self.orders[index])
    }

    #[instrument(skip(self))]
    pub fn set_payment_status(&mut self, order_id: &str, status: PaymentStatus) -> Result<&Order, OrderError> {
        let index = self.position(order_id)?;
        let events = {
            let order = &mut self.orders[index];
            order.set_payment_status(status, Utc::now());
            order.take_events()
        };
        self.commit(events);
        Ok(&self.orders[index])
    }

    /// Permanently removes an order. Confirmation is the caller's job.
    #[instrument(skip(self))]
    pub fn delete(&mut self, order_id: &str) -> Result<Order, OrderError> {
        let index = self.position(order_id)?;
        let order = self.orders.remove(index);
        self.commit(vec![DomainEvent::Order(OrderEvent::Deleted { order_id: order.id().to_string() })]);
        Ok(order)
    }

    fn position(&self, order_id: &str) -> Result<usize, OrderError> {
        self.orders.iter().position(|o| o.id() == order_id).ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    fn commit(&mut self, events: Vec<DomainEvent>) {
        if let Err(e) = save(self.store.as_ref(), keys::ORDERS, &self.orders) {
            warn!(error = %e, "failed to persist orders");
        }
        self.bus.publish(events);
    }
}
