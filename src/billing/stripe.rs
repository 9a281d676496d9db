//! Stripe REST client (form-encoded requests, JSON responses)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{PaymentError, PaymentProvider, Result, Subscription};
use crate::ledger::BillingPlan;

const PRODUCT_NAME: &str = "BoostFrame Pro";
const PRODUCT_DESCRIPTION: &str = "Unlimited video captioning without watermarks";

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CustomerObject {
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    latest_invoice: Option<serde_json::Value>,
}

impl SubscriptionObject {
    fn into_subscription(self) -> Subscription {
        // Only present when the invoice and its payment intent were expanded
        let client_secret = self
            .latest_invoice
            .as_ref()
            .and_then(|invoice| invoice.pointer("/payment_intent/client_secret"))
            .and_then(|secret| secret.as_str())
            .map(str::to_string);

        Subscription {
            id: self.id,
            customer_id: self.customer,
            status: self.status,
            client_secret,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(api_base: &str, secret_key: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PaymentError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| PaymentError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| PaymentError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_customer(&self, email: &str, name: &str) -> Result<String> {
        let created: Created = self
            .send(
                self.http
                    .post(self.url("customers"))
                    .form(&[("email", email), ("name", name)]),
            )
            .await?;
        debug!(customer_id = %created.id, "Created payment customer");
        Ok(created.id)
    }

    async fn customer_exists(&self, customer_id: &str) -> Result<bool> {
        match self
            .send::<CustomerObject>(self.http.get(self.url(&format!("customers/{customer_id}"))))
            .await
        {
            Ok(customer) => Ok(!customer.deleted),
            Err(PaymentError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_price(&self, plan: BillingPlan) -> Result<String> {
        let product: Created = self
            .send(self.http.post(self.url("products")).form(&[
                ("name", PRODUCT_NAME),
                ("description", PRODUCT_DESCRIPTION),
            ]))
            .await?;

        let amount = plan.amount_cents().to_string();
        let price: Created = self
            .send(self.http.post(self.url("prices")).form(&[
                ("product", product.id.as_str()),
                ("unit_amount", amount.as_str()),
                ("currency", "usd"),
                ("recurring[interval]", plan.interval()),
            ]))
            .await?;

        debug!(price_id = %price.id, plan = plan.as_str(), "Created recurring price");
        Ok(price.id)
    }

    async fn create_subscription(&self, customer_id: &str, price_id: &str) -> Result<Subscription> {
        let subscription: SubscriptionObject = self
            .send(self.http.post(self.url("subscriptions")).form(&[
                ("customer", customer_id),
                ("items[0][price]", price_id),
                ("payment_behavior", "default_incomplete"),
                ("expand[]", "latest_invoice.payment_intent"),
            ]))
            .await?;
        Ok(subscription.into_subscription())
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription> {
        let subscription: SubscriptionObject = self
            .send(
                self.http
                    .get(self.url(&format!("subscriptions/{subscription_id}"))),
            )
            .await?;
        Ok(subscription.into_subscription())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .send(
                self.http
                    .delete(self.url(&format!("subscriptions/{subscription_id}"))),
            )
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stripe"
    }
}
