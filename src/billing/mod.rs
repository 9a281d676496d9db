//! Subscription billing through an external payment provider

pub mod service;
pub mod stripe;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use service::{BillingError, BillingService, EventOutcome, PaymentEvent, SubscriptionStart};
pub use stripe::StripeClient;

use crate::config::PaymentsConfig;
use crate::ledger::BillingPlan;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment provider is not configured")]
    NotConfigured,

    #[error("Payment provider unreachable: {0}")]
    Unavailable(String),

    #[error("Payment provider error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected payment provider response: {0}")]
    Malformed(String),
}

impl PaymentError {
    pub fn is_transient(&self) -> bool {
        match self {
            PaymentError::Unavailable(_) => true,
            PaymentError::Api { status, .. } => *status >= 500 || *status == 429,
            PaymentError::NotConfigured | PaymentError::Malformed(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

/// List prices of the paid plan
impl BillingPlan {
    pub fn amount_cents(&self) -> i64 {
        match self {
            BillingPlan::Monthly => 2_900,
            BillingPlan::Yearly => 29_000,
        }
    }

    pub fn interval(&self) -> &'static str {
        match self {
            BillingPlan::Monthly => "month",
            BillingPlan::Yearly => "year",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    /// Secret the client uses to confirm the first payment
    pub client_secret: Option<String>,
}

/// Operations the service needs from a payment provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_customer(&self, email: &str, name: &str) -> Result<String>;

    async fn customer_exists(&self, customer_id: &str) -> Result<bool>;

    /// Create a recurring price for the plan and return its id
    async fn create_price(&self, plan: BillingPlan) -> Result<String>;

    async fn create_subscription(&self, customer_id: &str, price_id: &str) -> Result<Subscription>;

    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Provider used when no secret key is available; every call fails with
/// [`PaymentError::NotConfigured`].
#[derive(Debug, Clone, Default)]
pub struct DisabledPayments;

#[async_trait]
impl PaymentProvider for DisabledPayments {
    async fn create_customer(&self, _email: &str, _name: &str) -> Result<String> {
        Err(PaymentError::NotConfigured)
    }

    async fn customer_exists(&self, _customer_id: &str) -> Result<bool> {
        Err(PaymentError::NotConfigured)
    }

    async fn create_price(&self, _plan: BillingPlan) -> Result<String> {
        Err(PaymentError::NotConfigured)
    }

    async fn create_subscription(&self, _customer_id: &str, _price_id: &str) -> Result<Subscription> {
        Err(PaymentError::NotConfigured)
    }

    async fn get_subscription(&self, _subscription_id: &str) -> Result<Subscription> {
        Err(PaymentError::NotConfigured)
    }

    async fn cancel_subscription(&self, _subscription_id: &str) -> Result<()> {
        Err(PaymentError::NotConfigured)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Build the provider described by `[payments]`
pub fn from_config(config: &PaymentsConfig) -> Result<Arc<dyn PaymentProvider>> {
    match &config.secret_key {
        Some(secret_key) => Ok(Arc::new(StripeClient::new(
            &config.api_base,
            secret_key,
            config.timeout_secs,
        )?)),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, payment endpoints are disabled");
            Ok(Arc::new(DisabledPayments))
        }
    }
}
