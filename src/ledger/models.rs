//! Canonical account, job and billing records.
//!
//! Every backend persists exactly these shapes; backend-specific layouts (the
//! fjall key scheme, the table-service column names) map to and from them in
//! one place each.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uuid::Uuid;

use crate::captions::CaptionOptions;

pub type JobId = u64;

/// Subscription tier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Paid,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Paid => "paid",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = String;

    /// Case-insensitive: external records carry both `"Paid"` and `"paid"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "paid" => Ok(PlanTier::Paid),
            other => Err(format!("unknown plan tier '{other}'")),
        }
    }
}

/// Lifecycle status of a caption job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
    Blocked,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Blocked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            "blocked" => Ok(JobStatus::Blocked),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub plan_tier: PlanTier,
    /// Cumulative minutes of completed jobs. Only ever increased by a job commit.
    pub total_minutes: f64,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: None,
            first_name: None,
            last_name: None,
            plan_tier: PlanTier::Free,
            total_minutes: 0.0,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.plan_tier == PlanTier::Paid
    }

    /// Display name used with the payment provider.
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        if name.trim().is_empty() {
            self.email.clone().unwrap_or_else(|| self.id.clone())
        } else {
            name
        }
    }
}

/// Partial update of the mutable, non-metering account fields.
///
/// `total_minutes` is deliberately absent: it only moves through
/// [`super::Transition`] commits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountPatch {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub plan_tier: Option<PlanTier>,
    pub stripe_customer_id: Option<String>,
    /// `Some(None)` clears the subscription reference.
    pub stripe_subscription_id: Option<Option<String>>,
}

impl AccountPatch {
    pub fn apply(&self, account: &mut Account, at: DateTime<Utc>) {
        if let Some(email) = &self.email {
            account.email = Some(email.clone());
        }
        if let Some(first_name) = &self.first_name {
            account.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &self.last_name {
            account.last_name = Some(last_name.clone());
        }
        if let Some(tier) = self.plan_tier {
            account.plan_tier = tier;
        }
        if let Some(customer) = &self.stripe_customer_id {
            account.stripe_customer_id = Some(customer.clone());
        }
        if let Some(subscription) = &self.stripe_subscription_id {
            account.stripe_subscription_id = subscription.clone();
        }
        account.updated_at = at;
    }
}

/// Output artifacts reported by the pipeline for a finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    pub caption_file: Option<String>,
    pub video_file: Option<String>,
}

impl Artifacts {
    pub fn is_empty(&self) -> bool {
        let blank = |uri: &Option<String>| uri.as_deref().is_none_or(|u| u.trim().is_empty());
        blank(&self.caption_file) && blank(&self.video_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub account_id: String,
    pub filename: String,
    pub video_file_url: String,
    pub duration_minutes: f64,
    /// Decided once at admission from the ledger snapshot; never recomputed.
    pub watermarked: bool,
    pub status: JobStatus,
    pub outputs: Artifacts,
    pub caption_options: CaptionOptions,
    pub error_log: Option<String>,
    /// Token of the transition that last wrote this job
    #[serde(default)]
    pub last_transition: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to create a job record; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub account_id: String,
    pub filename: String,
    pub video_file_url: String,
    pub duration_minutes: f64,
    pub watermarked: bool,
    pub caption_options: CaptionOptions,
}

impl NewJob {
    pub fn into_job(self, id: JobId, at: DateTime<Utc>) -> Job {
        Job {
            id,
            account_id: self.account_id,
            filename: self.filename,
            video_file_url: self.video_file_url,
            duration_minutes: self.duration_minutes,
            watermarked: self.watermarked,
            status: JobStatus::Pending,
            outputs: Artifacts::default(),
            caption_options: self.caption_options,
            error_log: None,
            last_transition: None,
            created_at: at,
            updated_at: at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPlan {
    Monthly,
    Yearly,
}

impl BillingPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPlan::Monthly => "monthly",
            BillingPlan::Yearly => "yearly",
        }
    }
}

impl FromStr for BillingPlan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(BillingPlan::Monthly),
            "yearly" => Ok(BillingPlan::Yearly),
            other => Err(format!("unknown billing plan '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    Succeeded,
    Failed,
    Refunded,
    Canceled,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Succeeded => "succeeded",
            BillingStatus::Failed => "failed",
            BillingStatus::Refunded => "refunded",
            BillingStatus::Canceled => "canceled",
        }
    }
}

impl FromStr for BillingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "succeeded" => Ok(BillingStatus::Succeeded),
            "failed" => Ok(BillingStatus::Failed),
            "refunded" => Ok(BillingStatus::Refunded),
            "canceled" | "cancelled" => Ok(BillingStatus::Canceled),
            other => Err(format!("unknown billing status '{other}'")),
        }
    }
}

/// Append-only payment history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingRecord {
    pub id: String,
    pub account_id: String,
    pub payment_ref: Option<String>,
    pub amount_cents: Option<i64>,
    pub plan: Option<BillingPlan>,
    pub status: BillingStatus,
    pub created_at: DateTime<Utc>,
}

impl BillingRecord {
    pub fn new(account_id: impl Into<String>, status: BillingStatus) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            account_id: account_id.into(),
            payment_ref: None,
            amount_cents: None,
            plan: None,
            status,
            created_at: Utc::now(),
        }
    }
}
