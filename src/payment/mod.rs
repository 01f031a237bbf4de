//! Payment provider integration
//!
//! Amounts travel in major units everywhere in the crate and are converted to
//! minor units only when a request leaves for the provider.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use crate::domain::value_objects::to_minor_units;

const STRIPE_API: &str = "https://api.stripe.com/v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Succeeded { payment_id: String },
    /// The customer must finish authentication at `url` before the payment settles.
    Redirect { url: String },
    Failed { reason: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + Debug {
    /// Creates an intent for `amount` (major units) and returns its client secret.
    async fn create_intent(&self, amount: Decimal, currency: &str) -> Result<PaymentIntent, PaymentError>;

    async fn confirm_payment(&self, client_secret: &str, return_url: &str) -> Result<ConfirmationOutcome, PaymentError>;
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payment provider rejected the request: {0}")]
    Provider(String),
    #[error("invalid payment amount {0}")]
    InvalidAmount(Decimal),
    #[error("unknown payment intent")]
    UnknownIntent,
}

fn minor_amount(amount: Decimal) -> Result<i64, PaymentError> {
    match to_minor_units(amount) {
        Some(minor) if minor > 0 => Ok(minor),
        _ => Err(PaymentError::InvalidAmount(amount)),
    }
}

/// Stripe Payment Intents over HTTPS.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    next_action: Option<StripeNextAction>,
}

#[derive(Deserialize)]
struct StripeNextAction {
    redirect_to_url: Option<StripeRedirect>,
}

#[derive(Deserialize)]
struct StripeRedirect {
    url: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), secret_key: secret_key.into(), base_url: STRIPE_API.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<StripeIntent, PaymentError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<StripeErrorBody>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(PaymentError::Provider(message));
        }
        Ok(response.json::<StripeIntent>().await?)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self))]
    async fn create_intent(&self, amount: Decimal, currency: &str) -> Result<PaymentIntent, PaymentError> {
        let minor = minor_amount(amount)?;
        let form = [
            ("amount", minor.to_string()),
            ("currency", currency.to_lowercase()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        let intent = self.post("payment_intents", &form).await?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| PaymentError::Provider("intent has no client secret".into()))?;
        info!(intent_id = %intent.id, amount_minor = intent.amount, "payment intent created");
        Ok(PaymentIntent { id: intent.id, client_secret, amount_minor: intent.amount, currency: intent.currency })
    }

    #[instrument(skip_all)]
    async fn confirm_payment(&self, client_secret: &str, return_url: &str) -> Result<ConfirmationOutcome, PaymentError> {
        let intent_id = client_secret.split("_secret_").next().filter(|id| !id.is_empty()).ok_or(PaymentError::UnknownIntent)?;
        let form = [("return_url", return_url.to_string())];
        let intent = self.post(&format!("payment_intents/{intent_id}/confirm"), &form).await?;
        let outcome = match intent.status.as_str() {
            "succeeded" => ConfirmationOutcome::Succeeded { payment_id: intent.id },
            "requires_action" => match intent.next_action.and_then(|a| a.redirect_to_url) {
                Some(redirect) => ConfirmationOutcome::Redirect { url: redirect.url },
                None => ConfirmationOutcome::Failed { reason: "payment requires further action".into() },
            },
            other => ConfirmationOutcome::Failed { reason: format!("payment status {other}") },
        };
        Ok(outcome)
    }
}

/// In-process provider for local runs and tests.
#[derive(Debug, Default)]
pub struct SimulatedGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    fail_intents: bool,
    decline: bool,
}

impl SimulatedGateway {
    pub fn new() -> Self { Self::default() }

    /// Every intent request fails.
    pub fn failing() -> Self { Self { fail_intents: true, ..Self::default() } }

    /// Intents are created but every confirmation is declined.
    pub fn declining() -> Self { Self { decline: true, ..Self::default() } }

    pub fn intents(&self) -> Vec<PaymentIntent> {
        self.intents.lock().map(|m| m.values().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn create_intent(&self, amount: Decimal, currency: &str) -> Result<PaymentIntent, PaymentError> {
        if self.fail_intents { return Err(PaymentError::Provider("simulated provider outage".into())); }
        let amount_minor = minor_amount(amount)?;
        let id = format!("pi_sim_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret_{}", Uuid::new_v4().simple()),
            id,
            amount_minor,
            currency: currency.to_lowercase(),
        };
        let mut intents = self.intents.lock().map_err(|_| PaymentError::Provider("simulated provider poisoned".into()))?;
        intents.insert(intent.client_secret.clone(), intent.clone());
        Ok(intent)
    }

    async fn confirm_payment(&self, client_secret: &str, _return_url: &str) -> Result<ConfirmationOutcome, PaymentError> {
        let intents = self.intents.lock().map_err(|_| PaymentError::Provider("simulated provider poisoned".into()))?;
        let intent = intents.get(client_secret).ok_or(PaymentError::UnknownIntent)?;
        if self.decline {
            warn!(intent_id = %intent.id, "simulated card declined");
            return Ok(ConfirmationOutcome::Failed { reason: "card declined".into() });
        }
        Ok(ConfirmationOutcome::Succeeded { payment_id: intent.id.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_intent_uses_minor_units() {
        let gateway = SimulatedGateway::new();
        let intent = gateway.create_intent(Decimal::new(5897, 2), "EUR").await.unwrap();
        assert_eq!(intent.amount_minor, 5897);
        assert_eq!(intent.currency, "eur");
        assert!(intent.client_secret.starts_with(&intent.id));
        let outcome = gateway.confirm_payment(&intent.client_secret, "http://localhost/done").await.unwrap();
        assert_eq!(outcome, ConfirmationOutcome::Succeeded { payment_id: intent.id });
    }

    #[tokio::test]
    async fn test_simulated_rejects_unknown_and_zero() {
        let gateway = SimulatedGateway::new();
        assert!(matches!(gateway.confirm_payment("nope", "x").await, Err(PaymentError::UnknownIntent)));
        assert!(matches!(gateway.create_intent(Decimal::ZERO, "eur").await, Err(PaymentError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_declining_gateway() {
        let gateway = SimulatedGateway::declining();
        let intent = gateway.create_intent(Decimal::ONE, "eur").await.unwrap();
        let outcome = gateway.confirm_payment(&intent.client_secret, "x").await.unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Failed { .. }));
    }
}
