//! Checkout orchestration
//!
//! Drives a [`CheckoutSession`] against the cart, the payment provider and the
//! order list. A successful checkout places an order built from the session and
//! the cart contents, then clears the cart.

use std::sync::Arc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};
use crate::domain::aggregates::checkout::{
    CardPaymentSucceeded, CheckoutError, CheckoutSession, PaymentIntentState, PaymentSubmission,
};
use crate::domain::aggregates::order::{NewOrder, Order, OrderItem};
use crate::payment::{ConfirmationOutcome, PaymentGateway};
use crate::services::{CartStore, EventBus, OrderStore};
use crate::Result;

/// Where a payment submission or confirmation left the session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CheckoutOutcome {
    /// The session reached confirmation and this order was placed.
    Completed(Box<Order>),
    /// Card path: the client must confirm the payment with this secret.
    AwaitingConfirmation {
        #[serde(rename = "clientSecret")]
        client_secret: String,
    },
    /// The provider wants the customer to finish authentication elsewhere.
    Redirect { url: String },
}

/// The provider's answer to a card confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardConfirmation {
    Paid(CardPaymentSucceeded),
    Redirect { url: String },
}

/// Fails an intent that is still pending when the provider call is dropped.
struct PendingIntent<'a>(&'a mut CheckoutSession);

impl Drop for PendingIntent<'_> {
    fn drop(&mut self) {
        self.0.payment_intent_failed("request abandoned");
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    currency_symbol: String,
    return_url: String,
    bus: EventBus,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
        currency_symbol: impl Into<String>,
        return_url: impl Into<String>,
        bus: EventBus,
    ) -> Self {
        Self {
            gateway, currency: currency.into(), currency_symbol: currency_symbol.into(),
            return_url: return_url.into(), bus,
        }
    }

    /// Opens a session over the current cart. An empty cart cannot be checked out.
    pub fn start(&self, cart: &CartStore) -> Result<CheckoutSession> {
        if cart.is_empty() { return Err(CheckoutError::EmptyCart.into()); }
        Ok(CheckoutSession::new(cart.subtotal(), self.currency.as_str()))
    }

    /// Requests a client secret for the session's current total.
    ///
    /// A failure leaves the session on the payment step with a retryable error.
    #[instrument(skip_all, fields(total = tracing::field::Empty))]
    pub async fn request_payment_intent(&self, session: &mut CheckoutSession, cart: &CartStore) -> Result<()> {
        session.sync_subtotal(cart.subtotal());
        let request = session.begin_payment_intent()?;
        tracing::Span::current().record("total", tracing::field::display(request.amount));
        let mut pending = PendingIntent(session);
        let result = self.gateway.create_intent(request.amount, &request.currency).await;
        let session = &mut *pending.0;
        let outcome = match result {
            Ok(intent) => session.payment_intent_created(intent.client_secret, request.amount).map_err(Into::into),
            Err(e) => {
                warn!(error = %e, "payment intent request failed");
                session.payment_intent_failed(e.to_string());
                Err(CheckoutError::PaymentFailed(e.to_string()).into())
            }
        };
        self.bus.publish(session.take_events());
        outcome
    }

    /// Submits the payment step. Deferred methods complete immediately; card payments
    /// hand back the client secret for confirmation.
    #[instrument(skip_all)]
    pub fn submit_payment(&self, session: &mut CheckoutSession, cart: &mut CartStore, orders: &mut OrderStore) -> Result<CheckoutOutcome> {
        session.sync_subtotal(cart.subtotal());
        match session.submit_payment()? {
            PaymentSubmission::Complete => self.finish(session, cart, orders, None),
            PaymentSubmission::AwaitConfirmation { client_secret } => Ok(CheckoutOutcome::AwaitingConfirmation { client_secret }),
        }
    }

    /// Confirms the card payment with the provider and completes on success.
    pub async fn confirm_card_payment(&self, session: &mut CheckoutSession, cart: &mut CartStore, orders: &mut OrderStore) -> Result<CheckoutOutcome> {
        match self.confirm_with_provider(session, cart).await? {
            CardConfirmation::Paid(proof) => self.complete_card_payment(session, cart, orders, proof),
            CardConfirmation::Redirect { url } => Ok(CheckoutOutcome::Redirect { url }),
        }
    }

    /// Asks the provider to confirm the session's card payment. Nothing is placed yet.
    #[instrument(skip_all)]
    pub async fn confirm_with_provider(&self, session: &mut CheckoutSession, cart: &CartStore) -> Result<CardConfirmation> {
        session.sync_subtotal(cart.subtotal());
        let PaymentSubmission::AwaitConfirmation { client_secret } = session.submit_payment()? else {
            return Err(CheckoutError::PaymentMethodMismatch(session.form().payment_method).into());
        };
        let outcome = self.gateway.confirm_payment(&client_secret, &self.return_url).await.map_err(|e| {
            warn!(error = %e, "payment confirmation request failed");
            CheckoutError::PaymentFailed(e.to_string())
        })?;
        match outcome {
            ConfirmationOutcome::Succeeded { payment_id } => Ok(CardConfirmation::Paid(CardPaymentSucceeded { client_secret, payment_id })),
            ConfirmationOutcome::Redirect { url } => Ok(CardConfirmation::Redirect { url }),
            ConfirmationOutcome::Failed { reason } => {
                warn!(%reason, "card payment declined");
                Err(CheckoutError::PaymentFailed(reason).into())
            }
        }
    }

    /// Places the order for a card payment the provider reported as paid. `cart` must be
    /// the snapshot the payment was confirmed against.
    pub fn complete_card_payment(
        &self,
        session: &mut CheckoutSession,
        cart: &mut CartStore,
        orders: &mut OrderStore,
        proof: CardPaymentSucceeded,
    ) -> Result<CheckoutOutcome> {
        self.finish(session, cart, orders, Some(proof))
    }

    /// Current total and whether the card UI can be used yet.
    pub fn payment_ready(&self, session: &CheckoutSession) -> (Decimal, bool) {
        (session.total(), matches!(session.intent(), PaymentIntentState::Ready { .. }))
    }

    fn finish(
        &self,
        session: &mut CheckoutSession,
        cart: &mut CartStore,
        orders: &mut OrderStore,
        card: Option<CardPaymentSucceeded>,
    ) -> Result<CheckoutOutcome> {
        let ticket = session.authorize_completion(card)?;
        let form = session.form();
        let order = Order::place(NewOrder {
            order_number: orders.next_order_number(),
            customer: form.contact.to_customer(),
            items: cart.lines().iter().map(OrderItem::from_cart_line).collect(),
            tax: Decimal::ZERO,
            shipping: session.shipping_cost(),
            discount: Decimal::ZERO,
            currency: self.currency_symbol.clone(),
            shipping_method: form.shipping_method,
            payment_method: form.payment_method,
            payment_status: ticket.payment_status(),
            payment_id: ticket.payment_id().map(str::to_owned),
            notes: None,
        })?;
        let order_number = order.order_number().to_string();
        orders.insert(order.clone());
        cart.clear();
        session.complete(ticket, order_number.clone());
        self.bus.publish(session.take_events());
        info!(%order_number, total = %order.total(), "checkout completed");
        Ok(CheckoutOutcome::Completed(Box::new(order)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::checkout::fixtures::contact;
    use crate::domain::aggregates::checkout::{CheckoutStep, PaymentMethod, ShippingMethod};
    use crate::domain::aggregates::order::PaymentStatus;
    use crate::domain::aggregates::product::fixtures::product;
    use crate::domain::value_objects::Quantity;
    use crate::payment::SimulatedGateway;
    use crate::storage::{keys, MemoryStore, SharedStore};
    use crate::payment::{PaymentError, PaymentIntent};
    use crate::StorefrontError;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug)]
    struct StalledGateway;

    #[async_trait]
    impl PaymentGateway for StalledGateway {
        async fn create_intent(&self, _amount: Decimal, _currency: &str) -> std::result::Result<PaymentIntent, PaymentError> {
            std::future::pending().await
        }
        async fn confirm_payment(&self, _client_secret: &str, _return_url: &str) -> std::result::Result<ConfirmationOutcome, PaymentError> {
            std::future::pending().await
        }
    }

    struct Harness {
        cart: CartStore,
        orders: OrderStore,
        gateway: Arc<SimulatedGateway>,
        service: CheckoutService,
    }

    fn harness(gateway: SimulatedGateway) -> Harness {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let bus = EventBus::default();
        let mut cart = CartStore::open(store.clone(), keys::CART, bus.clone());
        cart.add_item(product("A", Decimal::new(1899, 2)), Quantity::new(2).unwrap(), None).unwrap();
        cart.add_item(product("B", Decimal::new(1599, 2)), Quantity::ONE, None).unwrap();
        let orders = OrderStore::open(store, bus.clone());
        let gateway = Arc::new(gateway);
        let service = CheckoutService::new(gateway.clone(), "eur", "€", "http://localhost/done", bus);
        Harness { cart, orders, gateway, service }
    }

    fn at_payment(h: &Harness, method: PaymentMethod) -> CheckoutSession {
        let mut session = h.service.start(&h.cart).unwrap();
        session.submit_information(contact()).unwrap();
        session.submit_shipping(ShippingMethod::Standard).unwrap();
        session.select_payment_method(method).unwrap();
        session
    }

    #[test]
    fn test_empty_cart_cannot_start() {
        let mut h = harness(SimulatedGateway::new());
        h.cart.clear();
        assert!(matches!(h.service.start(&h.cart), Err(StorefrontError::Checkout(CheckoutError::EmptyCart))));
    }

    #[test]
    fn test_cash_on_delivery_places_order_and_clears_cart() {
        let mut h = harness(SimulatedGateway::new());
        let mut session = at_payment(&h, PaymentMethod::CashOnDelivery);
        let outcome = h.service.submit_payment(&mut session, &mut h.cart, &mut h.orders).unwrap();
        let CheckoutOutcome::Completed(order) = outcome else { panic!("expected completion") };
        assert_eq!(order.totals().subtotal(), Decimal::new(5397, 2));
        assert_eq!(order.total(), Decimal::new(5897, 2));
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.items().len(), 2);
        assert_eq!(session.step(), CheckoutStep::Confirmation);
        assert_eq!(session.order_number(), Some(order.order_number()));
        assert!(h.cart.is_empty());
        assert_eq!(h.orders.len(), 1);
    }

    #[tokio::test]
    async fn test_card_flow_sends_current_total() {
        let mut h = harness(SimulatedGateway::new());
        let mut session = at_payment(&h, PaymentMethod::Card);
        session.select_shipping_method(ShippingMethod::Express).unwrap();
        h.service.request_payment_intent(&mut session, &h.cart).await.unwrap();
        assert_eq!(h.gateway.intents()[0].amount_minor, 6897);

        let outcome = h.service.submit_payment(&mut session, &mut h.cart, &mut h.orders).unwrap();
        assert!(matches!(outcome, CheckoutOutcome::AwaitingConfirmation { .. }));
        assert_eq!(session.step(), CheckoutStep::Payment);
        assert!(!h.cart.is_empty());

        let outcome = h.service.confirm_card_payment(&mut session, &mut h.cart, &mut h.orders).await.unwrap();
        let CheckoutOutcome::Completed(order) = outcome else { panic!("expected completion") };
        assert_eq!(order.payment_status(), PaymentStatus::Completed);
        assert_eq!(order.payment_id(), Some(h.gateway.intents()[0].id.as_str()));
        assert_eq!(order.total(), Decimal::new(6897, 2));
        assert!(h.cart.is_empty());
    }

    #[tokio::test]
    async fn test_cart_change_refreshes_intent_amount() {
        let mut h = harness(SimulatedGateway::new());
        let mut session = at_payment(&h, PaymentMethod::Card);
        h.service.request_payment_intent(&mut session, &h.cart).await.unwrap();
        h.cart.remove_item(&crate::domain::value_objects::LineItemKey::product("B"));
        h.service.request_payment_intent(&mut session, &h.cart).await.unwrap();
        let mut amounts: Vec<i64> = h.gateway.intents().iter().map(|i| i.amount_minor).collect();
        amounts.sort_unstable();
        assert_eq!(amounts, vec![4298, 5897]);
    }

    #[tokio::test]
    async fn test_intent_failure_is_retryable() {
        let mut h = harness(SimulatedGateway::failing());
        let mut session = at_payment(&h, PaymentMethod::Card);
        let err = h.service.request_payment_intent(&mut session, &h.cart).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::PaymentFailed(_))));
        assert!(matches!(session.intent(), PaymentIntentState::Failed { .. }));
        assert_eq!(session.step(), CheckoutStep::Payment);
        assert!(session.needs_payment_intent());
        assert!(h.service.submit_payment(&mut session, &mut h.cart, &mut h.orders).is_err());
        assert!(h.orders.is_empty());
    }

    #[tokio::test]
    async fn test_declined_card_never_confirms() {
        let mut h = harness(SimulatedGateway::declining());
        let mut session = at_payment(&h, PaymentMethod::Card);
        h.service.request_payment_intent(&mut session, &h.cart).await.unwrap();
        let err = h.service.confirm_card_payment(&mut session, &mut h.cart, &mut h.orders).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Checkout(CheckoutError::PaymentFailed(_))));
        assert_eq!(session.step(), CheckoutStep::Payment);
        assert!(!h.cart.is_empty());
        assert!(h.orders.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_intent_request_can_be_retried() {
        let h = harness(SimulatedGateway::new());
        let stalled = CheckoutService::new(Arc::new(StalledGateway), "eur", "€", "http://localhost/done", EventBus::default());
        let mut session = at_payment(&h, PaymentMethod::Card);

        let dropped = tokio::time::timeout(Duration::from_millis(20), stalled.request_payment_intent(&mut session, &h.cart)).await;
        assert!(dropped.is_err());
        assert!(matches!(session.intent(), PaymentIntentState::Failed { .. }));
        assert!(session.needs_payment_intent());

        h.service.request_payment_intent(&mut session, &h.cart).await.unwrap();
        assert!(matches!(session.intent(), PaymentIntentState::Ready { .. }));
    }

    #[tokio::test]
    async fn test_provider_confirmation_places_nothing_until_completed() {
        let mut h = harness(SimulatedGateway::new());
        let mut session = at_payment(&h, PaymentMethod::Card);
        h.service.request_payment_intent(&mut session, &h.cart).await.unwrap();

        let CardConfirmation::Paid(proof) = h.service.confirm_with_provider(&mut session, &h.cart).await.unwrap() else {
            panic!("expected a paid confirmation");
        };
        assert!(h.orders.is_empty());
        assert_eq!(session.step(), CheckoutStep::Payment);

        let outcome = h.service.complete_card_payment(&mut session, &mut h.cart, &mut h.orders, proof).unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Completed(_)));
        assert_eq!(h.orders.len(), 1);
    }
}
