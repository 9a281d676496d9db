use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::{PaymentError, PaymentProvider};
use crate::config::PaymentsConfig;
use crate::ledger::{
    Account, AccountPatch, BillingPlan, BillingRecord, BillingStatus, LedgerError, PlanTier,
    RecordStore,
};

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Account {0} has no email on file")]
    MissingEmail(String),

    #[error("Invalid payment event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Store(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, BillingError>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscriptionStart {
    pub subscription_id: String,
    pub client_secret: Option<String>,
}

/// Provider event as delivered to the payment webhook
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    pub object: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Applied { account_id: String, tier: PlanTier },
    Ignored,
}

/// Subscription flows and payment event handling
pub struct BillingService {
    store: Arc<dyn RecordStore>,
    provider: Arc<dyn PaymentProvider>,
    config: PaymentsConfig,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn PaymentProvider>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    async fn account(&self, account_id: &str) -> Result<Account> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| BillingError::UnknownAccount(account_id.to_string()))
    }

    /// Start a subscription for the plan, replacing any existing one.
    ///
    /// The account keeps its tier until the first payment succeeds.
    pub async fn start_subscription(
        &self,
        account_id: &str,
        plan: BillingPlan,
    ) -> Result<SubscriptionStart> {
        let account = self.account(account_id).await?;
        let email = account
            .email
            .clone()
            .ok_or_else(|| BillingError::MissingEmail(account_id.to_string()))?;

        if let Some(existing) = &account.stripe_subscription_id {
            match self.provider.cancel_subscription(existing).await {
                Ok(()) => info!(account_id, subscription_id = %existing, "Canceled previous subscription"),
                Err(e) => warn!(account_id, error = %e, "Could not cancel previous subscription"),
            }
        }

        let customer_id = self.ensure_customer(&account, &email).await?;

        let price_id = match self.configured_price(plan) {
            Some(price_id) => price_id,
            None => self.provider.create_price(plan).await?,
        };

        let subscription = self
            .provider
            .create_subscription(&customer_id, &price_id)
            .await?;

        self.store
            .update_account(
                account_id,
                &AccountPatch {
                    stripe_subscription_id: Some(Some(subscription.id.clone())),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            account_id,
            plan = plan.as_str(),
            subscription_id = %subscription.id,
            has_client_secret = subscription.client_secret.is_some(),
            "Subscription created"
        );

        Ok(SubscriptionStart {
            subscription_id: subscription.id,
            client_secret: subscription.client_secret,
        })
    }

    /// Reuse the stored customer if the provider still knows it
    async fn ensure_customer(&self, account: &Account, email: &str) -> Result<String> {
        if let Some(customer_id) = &account.stripe_customer_id {
            if self.provider.customer_exists(customer_id).await? {
                return Ok(customer_id.clone());
            }
            warn!(account_id = %account.id, %customer_id, "Stored customer is gone, creating a new one");
        }

        let customer_id = self
            .provider
            .create_customer(email, &account.display_name())
            .await?;

        self.store
            .update_account(
                &account.id,
                &AccountPatch {
                    stripe_customer_id: Some(customer_id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        Ok(customer_id)
    }

    fn configured_price(&self, plan: BillingPlan) -> Option<String> {
        match plan {
            BillingPlan::Monthly => self.config.monthly_price_id.clone(),
            BillingPlan::Yearly => self.config.yearly_price_id.clone(),
        }
    }

    /// Confirm a payment made by the client and upgrade the account
    pub async fn complete_payment(&self, account_id: &str) -> Result<Account> {
        self.account(account_id).await?;

        let account = self
            .store
            .update_account(
                account_id,
                &AccountPatch {
                    plan_tier: Some(PlanTier::Paid),
                    ..Default::default()
                },
            )
            .await?;

        let mut record = BillingRecord::new(account_id, BillingStatus::Succeeded);
        record.payment_ref = account.stripe_subscription_id.clone();
        self.store.append_billing(&record).await?;

        info!(account_id, "Account upgraded to paid");
        Ok(account)
    }

    /// Apply a payment provider event to the owning account
    pub async fn handle_event(&self, event: &PaymentEvent) -> Result<EventOutcome> {
        match event.kind.as_str() {
            "invoice.payment_succeeded" | "payment_intent.succeeded" => {
                self.payment_succeeded(event).await
            }
            "customer.subscription.deleted" => self.subscription_deleted(event).await,
            other => {
                info!(event_type = other, "Ignoring payment event");
                Ok(EventOutcome::Ignored)
            }
        }
    }

    async fn payment_succeeded(&self, event: &PaymentEvent) -> Result<EventOutcome> {
        let object = &event.data.object;
        let subscription_id = string_field(object, "subscription");

        let customer_id = match (string_field(object, "customer"), &subscription_id) {
            (Some(customer), _) => customer,
            (None, Some(subscription)) => {
                self.provider.get_subscription(subscription).await?.customer_id
            }
            (None, None) => {
                return Err(BillingError::InvalidEvent(format!(
                    "{} carries neither customer nor subscription",
                    event.kind
                )));
            }
        };

        let Some(account) = self.store.find_account_by_customer(&customer_id).await? else {
            warn!(%customer_id, event_type = %event.kind, "No account for payment customer");
            return Ok(EventOutcome::Ignored);
        };

        let patch = AccountPatch {
            plan_tier: Some(PlanTier::Paid),
            stripe_subscription_id: subscription_id.clone().map(Some),
            ..Default::default()
        };
        self.store.update_account(&account.id, &patch).await?;

        let mut record = BillingRecord::new(&account.id, BillingStatus::Succeeded);
        record.payment_ref = string_field(object, "id").or_else(|| event.id.clone());
        record.amount_cents = object
            .get("amount_paid")
            .or_else(|| object.get("amount_received"))
            .or_else(|| object.get("amount"))
            .and_then(Value::as_i64);
        record.plan = plan_from_object(object);
        self.store.append_billing(&record).await?;

        info!(account_id = %account.id, %customer_id, "Payment succeeded, account is paid");
        Ok(EventOutcome::Applied {
            account_id: account.id,
            tier: PlanTier::Paid,
        })
    }

    async fn subscription_deleted(&self, event: &PaymentEvent) -> Result<EventOutcome> {
        let object = &event.data.object;
        let customer_id = string_field(object, "customer").ok_or_else(|| {
            BillingError::InvalidEvent("subscription event without customer".to_string())
        })?;

        let Some(account) = self.store.find_account_by_customer(&customer_id).await? else {
            warn!(%customer_id, "No account for canceled subscription");
            return Ok(EventOutcome::Ignored);
        };

        let patch = AccountPatch {
            plan_tier: Some(PlanTier::Free),
            stripe_subscription_id: Some(None),
            ..Default::default()
        };
        self.store.update_account(&account.id, &patch).await?;

        let mut record = BillingRecord::new(&account.id, BillingStatus::Canceled);
        record.payment_ref = string_field(object, "id");
        record.plan = plan_from_object(object);
        self.store.append_billing(&record).await?;

        info!(account_id = %account.id, %customer_id, "Subscription deleted, account is free");
        Ok(EventOutcome::Applied {
            account_id: account.id,
            tier: PlanTier::Free,
        })
    }

    pub async fn history(&self, account_id: &str) -> Result<Vec<BillingRecord>> {
        self.account(account_id).await?;
        Ok(self.store.list_billing(account_id).await?)
    }
}

fn string_field(object: &Value, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Recurring interval of the first line or plan item, when present
fn plan_from_object(object: &Value) -> Option<BillingPlan> {
    [
        "/plan/interval",
        "/items/data/0/price/recurring/interval",
        "/lines/data/0/price/recurring/interval",
    ]
    .iter()
    .find_map(|pointer| object.pointer(pointer).and_then(Value::as_str))
    .and_then(|interval| match interval {
        "month" => Some(BillingPlan::Monthly),
        "year" => Some(BillingPlan::Yearly),
        _ => None,
    })
}
