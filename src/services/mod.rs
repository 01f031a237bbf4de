//! Application services: stores and flows built over the injected collaborators.

pub mod booking;
pub mod cart_store;
pub mod catalog;
pub mod checkout;
pub mod order_export;
pub mod order_store;

use tokio::sync::broadcast;
use tracing::debug;
use crate::domain::events::DomainEvent;

pub use booking::{BookingDesk, StaffSlots};
pub use cart_store::CartStore;
pub use catalog::Catalog;
pub use checkout::{CardConfirmation, CheckoutOutcome, CheckoutService};
pub use order_export::{csv_filename, export_csv};
pub use order_store::{OrderFilter, OrderSort, OrderStats, OrderStore, RecencyWindow, SortDirection, SortKey};

/// Fan-out of domain events to whoever is listening (presentation, audit log).
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> { self.tx.subscribe() }

    pub fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            debug!(?event, "domain event");
            // No subscribers is fine.
            let _ = self.tx.send(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self { Self::new(64) }
}
