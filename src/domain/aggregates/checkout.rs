//! Checkout Aggregate
//!
//! A linear flow `information -> shipping -> payment -> confirmation`. The session
//! holds the form data and the cart subtotal it was last synced with; shipping cost
//! and total are always derived, never stored.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};
use crate::domain::aggregates::order::{Address, CustomerInfo, PaymentStatus};
use crate::domain::events::{CheckoutEvent, DomainEvent};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckoutStep { #[default] Information, Shipping, Payment, Confirmation }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShippingMethod { #[default] Standard, Express }

impl ShippingMethod {
    pub fn cost(&self) -> Decimal {
        match self {
            Self::Standard => Decimal::new(5, 0),
            Self::Express => Decimal::new(15, 0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentMethod { #[default] Card, CashOnDelivery, Paypal }

impl PaymentMethod {
    /// Methods settled outside the card flow complete without a payment intent.
    pub fn is_deferred(&self) -> bool { !matches!(self, Self::Card) }
}

/// Contact and address fields collected on the information step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
}

impl ContactDetails {
    fn trimmed(mut self) -> Self {
        for field in [
            &mut self.email, &mut self.first_name, &mut self.last_name, &mut self.phone,
            &mut self.address, &mut self.city, &mut self.postal_code, &mut self.country,
        ] {
            *field = field.trim().to_string();
        }
        self
    }

    pub fn to_customer(&self) -> CustomerInfo {
        CustomerInfo {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            address: Address {
                street: self.address.clone(),
                city: self.city.clone(),
                postal_code: self.postal_code.clone(),
                country: self.country.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutForm {
    pub contact: ContactDetails,
    pub shipping_method: ShippingMethod,
    pub payment_method: PaymentMethod,
}

/// Progress of the payment intent for the card path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PaymentIntentState {
    #[default]
    Idle,
    Pending { amount: Decimal },
    Ready {
        #[serde(skip_serializing)]
        client_secret: String,
        amount: Decimal,
    },
    Failed { reason: String },
}

/// Amount and currency to request an intent for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub currency: String,
}

/// What submitting the payment step asks the caller to do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentSubmission {
    /// Deferred method: the order can be placed right away.
    Complete,
    /// Card: confirm with the payment provider using this secret.
    AwaitConfirmation { client_secret: String },
}

/// Proof that the payment provider reported a successful card payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardPaymentSucceeded {
    pub client_secret: String,
    pub payment_id: String,
}

/// Permission to finish the session, issued by [`CheckoutSession::authorize_completion`].
#[derive(Debug)]
pub struct CompletionTicket {
    payment_status: PaymentStatus,
    payment_id: Option<String>,
}

impl CompletionTicket {
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn payment_id(&self) -> Option<&str> { self.payment_id.as_deref() }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    step: CheckoutStep,
    form: CheckoutForm,
    subtotal: Decimal,
    currency: String,
    intent: PaymentIntentState,
    order_number: Option<String>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl CheckoutSession {
    pub fn new(subtotal: Decimal, currency: impl Into<String>) -> Self {
        Self {
            step: CheckoutStep::Information, form: CheckoutForm::default(), subtotal,
            currency: currency.into(), intent: PaymentIntentState::Idle, order_number: None, events: vec![],
        }
    }

    pub fn step(&self) -> CheckoutStep { self.step }
    pub fn form(&self) -> &CheckoutForm { &self.form }
    pub fn subtotal(&self) -> Decimal { self.subtotal }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn intent(&self) -> &PaymentIntentState { &self.intent }
    pub fn order_number(&self) -> Option<&str> { self.order_number.as_deref() }
    pub fn is_complete(&self) -> bool { self.step == CheckoutStep::Confirmation }

    pub fn shipping_cost(&self) -> Decimal { self.form.shipping_method.cost() }
    pub fn total(&self) -> Decimal { self.subtotal + self.shipping_cost() }

    /// Re-reads the cart subtotal. A ready intent for a different amount is dropped.
    pub fn sync_subtotal(&mut self, subtotal: Decimal) {
        if self.is_complete() || self.subtotal == subtotal { return; }
        self.subtotal = subtotal;
        self.invalidate_stale_intent();
    }

    pub fn submit_information(&mut self, contact: ContactDetails) -> Result<(), CheckoutError> {
        self.require_step(CheckoutStep::Information)?;
        let contact = contact.trimmed();
        contact.validate()?;
        self.form.contact = contact;
        self.advance(CheckoutStep::Shipping);
        Ok(())
    }

    /// Changes the shipping method on the shipping or payment step.
    pub fn select_shipping_method(&mut self, method: ShippingMethod) -> Result<(), CheckoutError> {
        if !matches!(self.step, CheckoutStep::Shipping | CheckoutStep::Payment) {
            return Err(CheckoutError::WrongStep { expected: CheckoutStep::Shipping, actual: self.step });
        }
        self.form.shipping_method = method;
        self.invalidate_stale_intent();
        Ok(())
    }

    pub fn submit_shipping(&mut self, method: ShippingMethod) -> Result<(), CheckoutError> {
        self.require_step(CheckoutStep::Shipping)?;
        self.select_shipping_method(method)?;
        self.advance(CheckoutStep::Payment);
        Ok(())
    }

    pub fn select_payment_method(&mut self, method: PaymentMethod) -> Result<(), CheckoutError> {
        self.require_step(CheckoutStep::Payment)?;
        self.form.payment_method = method;
        Ok(())
    }

    /// Whether the card path still needs a payment intent.
    pub fn needs_payment_intent(&self) -> bool {
        self.step == CheckoutStep::Payment
            && self.form.payment_method == PaymentMethod::Card
            && matches!(self.intent, PaymentIntentState::Idle | PaymentIntentState::Failed { .. })
    }

    /// Marks an intent request as in flight for the current total.
    pub fn begin_payment_intent(&mut self) -> Result<PaymentRequest, CheckoutError> {
        self.require_step(CheckoutStep::Payment)?;
        if self.form.payment_method != PaymentMethod::Card {
            return Err(CheckoutError::PaymentMethodMismatch(self.form.payment_method));
        }
        match self.intent {
            PaymentIntentState::Pending { .. } => return Err(CheckoutError::PaymentInProgress),
            PaymentIntentState::Ready { .. } => return Err(CheckoutError::IntentAlreadyReady),
            PaymentIntentState::Idle | PaymentIntentState::Failed { .. } => {}
        }
        let amount = self.total();
        self.intent = PaymentIntentState::Pending { amount };
        self.raise_event(DomainEvent::Checkout(CheckoutEvent::PaymentIntentRequested { amount }));
        Ok(PaymentRequest { amount, currency: self.currency.clone() })
    }

    /// Accepts the provider's client secret if it was issued for the current total.
    pub fn payment_intent_created(&mut self, client_secret: String, amount: Decimal) -> Result<(), CheckoutError> {
        let current = self.total();
        let requested = match self.intent {
            PaymentIntentState::Pending { amount } => amount,
            _ => return Err(CheckoutError::StaleAmount { requested: amount, current }),
        };
        if self.step != CheckoutStep::Payment || requested != amount || amount != current {
            self.intent = PaymentIntentState::Idle;
            return Err(CheckoutError::StaleAmount { requested: amount, current });
        }
        self.intent = PaymentIntentState::Ready { client_secret, amount };
        Ok(())
    }

    /// Records a failed intent request; the request may be retried.
    pub fn payment_intent_failed(&mut self, reason: impl Into<String>) {
        if !matches!(self.intent, PaymentIntentState::Pending { .. }) { return; }
        let reason = reason.into();
        self.intent = PaymentIntentState::Failed { reason: reason.clone() };
        self.raise_event(DomainEvent::Checkout(CheckoutEvent::PaymentIntentFailed { reason }));
    }

    pub fn submit_payment(&self) -> Result<PaymentSubmission, CheckoutError> {
        self.require_step(CheckoutStep::Payment)?;
        if self.form.payment_method.is_deferred() { return Ok(PaymentSubmission::Complete); }
        match &self.intent {
            PaymentIntentState::Ready { client_secret, .. } => {
                Ok(PaymentSubmission::AwaitConfirmation { client_secret: client_secret.clone() })
            }
            PaymentIntentState::Pending { .. } => Err(CheckoutError::PaymentInProgress),
            _ => Err(CheckoutError::PaymentNotReady),
        }
    }

    /// Checks that the session may finish. Card payments need the provider's success report
    /// for the intent this session holds.
    pub fn authorize_completion(&self, card: Option<CardPaymentSucceeded>) -> Result<CompletionTicket, CheckoutError> {
        self.require_step(CheckoutStep::Payment)?;
        if self.form.payment_method.is_deferred() {
            return Ok(CompletionTicket { payment_status: PaymentStatus::Pending, payment_id: None });
        }
        let PaymentIntentState::Ready { client_secret, .. } = &self.intent else {
            return Err(CheckoutError::PaymentNotReady);
        };
        match card {
            Some(proof) if &proof.client_secret == client_secret => Ok(CompletionTicket {
                payment_status: PaymentStatus::Completed,
                payment_id: Some(proof.payment_id),
            }),
            _ => Err(CheckoutError::PaymentNotConfirmed),
        }
    }

    pub fn complete(&mut self, _ticket: CompletionTicket, order_number: String) {
        let total = self.total();
        self.order_number = Some(order_number.clone());
        self.advance(CheckoutStep::Confirmation);
        self.raise_event(DomainEvent::Checkout(CheckoutEvent::Completed { order_number, total }));
    }

    pub fn back(&mut self) -> Result<(), CheckoutError> {
        let to = match self.step {
            CheckoutStep::Shipping => CheckoutStep::Information,
            CheckoutStep::Payment => CheckoutStep::Shipping,
            step => return Err(CheckoutError::CannotGoBack(step)),
        };
        if matches!(self.intent, PaymentIntentState::Pending { .. } | PaymentIntentState::Failed { .. }) {
            self.intent = PaymentIntentState::Idle;
        }
        self.advance(to);
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }

    fn invalidate_stale_intent(&mut self) {
        let total = self.total();
        if let PaymentIntentState::Ready { amount, .. } = &self.intent {
            if *amount != total { self.intent = PaymentIntentState::Idle; }
        }
    }

    fn require_step(&self, expected: CheckoutStep) -> Result<(), CheckoutError> {
        if self.step != expected { return Err(CheckoutError::WrongStep { expected, actual: self.step }); }
        Ok(())
    }

    fn advance(&mut self, step: CheckoutStep) {
        self.step = step;
        self.raise_event(DomainEvent::Checkout(CheckoutEvent::StepChanged { step }));
    }

    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[derive(Debug, Clone, Error)]
pub enum CheckoutError {
    #[error("Checkout is on the {actual:?} step, expected {expected:?}")]
    WrongStep { expected: CheckoutStep, actual: CheckoutStep },
    #[error("Invalid checkout details: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("Cart is empty")]
    EmptyCart,
    #[error("Payment method {0:?} does not use a payment intent")]
    PaymentMethodMismatch(PaymentMethod),
    #[error("A payment request is already in progress")]
    PaymentInProgress,
    #[error("A payment intent is already available")]
    IntentAlreadyReady,
    #[error("Card payment is not ready yet")]
    PaymentNotReady,
    #[error("Card payment has not been confirmed")]
    PaymentNotConfirmed,
    #[error("Payment amount {requested} no longer matches total {current}")]
    StaleAmount { requested: Decimal, current: Decimal },
    #[error("Cannot go back from the {0:?} step")]
    CannotGoBack(CheckoutStep),
    #[error("Payment failed: {0}")]
    PaymentFailed(String),
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn contact() -> ContactDetails {
        ContactDetails {
            email: "ada@example.com".into(), first_name: "Ada".into(), last_name: "Lovelace".into(),
            phone: "555-0100".into(), address: "1 Analytical Way".into(), city: "London".into(),
            postal_code: "N1 9GU".into(), country: "UK".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::contact;
    use super::*;

    fn at_payment(method: PaymentMethod) -> CheckoutSession {
        let mut s = CheckoutSession::new(Decimal::new(5397, 2), "eur");
        s.submit_information(contact()).unwrap();
        s.submit_shipping(ShippingMethod::Standard).unwrap();
        s.select_payment_method(method).unwrap();
        s
    }

    #[test]
    fn test_total_follows_shipping_method() {
        let mut s = CheckoutSession::new(Decimal::new(5397, 2), "eur");
        s.submit_information(contact()).unwrap();
        assert_eq!(s.shipping_cost(), Decimal::new(5, 0));
        assert_eq!(s.total(), Decimal::new(5897, 2));
        s.select_shipping_method(ShippingMethod::Express).unwrap();
        assert_eq!(s.shipping_cost(), Decimal::new(15, 0));
        assert_eq!(s.total(), Decimal::new(6897, 2));
    }

    #[test]
    fn test_information_validation() {
        let mut s = CheckoutSession::new(Decimal::ONE, "eur");
        let mut bad = contact();
        bad.email = "not-an-email".into();
        bad.city = "   ".into();
        let err = s.submit_information(bad).unwrap_err();
        let CheckoutError::Validation(errors) = err else { panic!("expected validation error") };
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("city"));
        assert_eq!(s.step(), CheckoutStep::Information);
    }

    #[test]
    fn test_no_skipping_steps() {
        let mut s = CheckoutSession::new(Decimal::ONE, "eur");
        assert!(matches!(s.submit_shipping(ShippingMethod::Express), Err(CheckoutError::WrongStep { .. })));
        assert!(s.submit_payment().is_err());
        s.submit_information(contact()).unwrap();
        s.back().unwrap();
        assert_eq!(s.step(), CheckoutStep::Information);
        assert!(matches!(s.back(), Err(CheckoutError::CannotGoBack(CheckoutStep::Information))));
    }

    #[test]
    fn test_deferred_payment_completes_without_intent() {
        let mut s = at_payment(PaymentMethod::CashOnDelivery);
        assert!(!s.needs_payment_intent());
        assert_eq!(s.submit_payment().unwrap(), PaymentSubmission::Complete);
        let ticket = s.authorize_completion(None).unwrap();
        assert_eq!(ticket.payment_status(), PaymentStatus::Pending);
        s.complete(ticket, "ORD-00000001".into());
        assert!(s.is_complete());
        assert!(s.back().is_err());
    }

    #[test]
    fn test_card_needs_confirmed_payment() {
        let mut s = at_payment(PaymentMethod::Card);
        assert!(s.needs_payment_intent());
        assert!(matches!(s.authorize_completion(None), Err(CheckoutError::PaymentNotReady)));

        let req = s.begin_payment_intent().unwrap();
        assert_eq!(req.amount, Decimal::new(5897, 2));
        assert!(matches!(s.begin_payment_intent(), Err(CheckoutError::PaymentInProgress)));
        s.payment_intent_created("pi_1_secret_x".into(), req.amount).unwrap();

        assert_eq!(
            s.submit_payment().unwrap(),
            PaymentSubmission::AwaitConfirmation { client_secret: "pi_1_secret_x".into() }
        );
        assert!(matches!(s.authorize_completion(None), Err(CheckoutError::PaymentNotConfirmed)));
        let wrong = CardPaymentSucceeded { client_secret: "other".into(), payment_id: "pi_2".into() };
        assert!(matches!(s.authorize_completion(Some(wrong)), Err(CheckoutError::PaymentNotConfirmed)));
        assert_eq!(s.step(), CheckoutStep::Payment);

        let proof = CardPaymentSucceeded { client_secret: "pi_1_secret_x".into(), payment_id: "pi_1".into() };
        let ticket = s.authorize_completion(Some(proof)).unwrap();
        assert_eq!(ticket.payment_id(), Some("pi_1"));
        s.complete(ticket, "ORD-00000002".into());
        assert_eq!(s.step(), CheckoutStep::Confirmation);
    }

    #[test]
    fn test_failed_intent_is_retryable() {
        let mut s = at_payment(PaymentMethod::Card);
        s.begin_payment_intent().unwrap();
        s.payment_intent_failed("provider unavailable");
        assert_eq!(s.intent(), &PaymentIntentState::Failed { reason: "provider unavailable".into() });
        assert!(s.needs_payment_intent());
        assert!(s.begin_payment_intent().is_ok());
    }

    #[test]
    fn test_shipping_change_invalidates_ready_intent() {
        let mut s = at_payment(PaymentMethod::Card);
        let req = s.begin_payment_intent().unwrap();
        s.payment_intent_created("secret".into(), req.amount).unwrap();
        s.select_shipping_method(ShippingMethod::Express).unwrap();
        assert_eq!(s.intent(), &PaymentIntentState::Idle);
        let req = s.begin_payment_intent().unwrap();
        assert_eq!(req.amount, Decimal::new(6897, 2));
    }

    #[test]
    fn test_response_for_old_total_is_discarded() {
        let mut s = at_payment(PaymentMethod::Card);
        let req = s.begin_payment_intent().unwrap();
        s.sync_subtotal(Decimal::new(100, 0));
        let err = s.payment_intent_created("secret".into(), req.amount).unwrap_err();
        assert!(matches!(err, CheckoutError::StaleAmount { .. }));
        assert_eq!(s.intent(), &PaymentIntentState::Idle);
    }
}
