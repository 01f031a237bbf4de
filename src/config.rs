//! Runtime configuration read from the environment (and `.env` when present).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentProvider {
    Simulated,
    Stripe { secret_key: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// `None` keeps all state in memory.
    pub data_dir: Option<PathBuf>,
    /// ISO currency code sent to the payment provider.
    pub currency: String,
    pub currency_symbol: String,
    pub payment: PaymentProvider,
    pub payment_return_url: String,
    pub booking_submit_delay: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any name -> value lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match var("PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name: "PORT", value: v })?,
            None => 8083,
        };
        let booking_submit_delay = match var("BOOKING_SUBMIT_DELAY_MS") {
            Some(v) => Duration::from_millis(
                v.parse().map_err(|_| ConfigError::Invalid { name: "BOOKING_SUBMIT_DELAY_MS", value: v })?,
            ),
            None => Duration::from_millis(1500),
        };
        let payment = match var("PAYMENT_PROVIDER").as_deref().unwrap_or("simulated") {
            "simulated" => PaymentProvider::Simulated,
            "stripe" => PaymentProvider::Stripe {
                secret_key: var("STRIPE_SECRET_KEY").ok_or(ConfigError::Missing("STRIPE_SECRET_KEY"))?,
            },
            other => return Err(ConfigError::Invalid { name: "PAYMENT_PROVIDER", value: other.to_string() }),
        };
        let currency = var("STORE_CURRENCY").unwrap_or_else(|| "eur".to_string()).to_lowercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid { name: "STORE_CURRENCY", value: currency });
        }

        Ok(Self {
            port,
            data_dir: var("STOREFRONT_DATA_DIR").map(PathBuf::from),
            currency,
            currency_symbol: var("STORE_CURRENCY_SYMBOL").unwrap_or_else(|| "€".to_string()),
            payment,
            payment_return_url: var("PAYMENT_RETURN_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}/checkout/complete")),
            booking_submit_delay,
        })
    }
}
