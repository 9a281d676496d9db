//! Request and response bodies of the HTTP API.
//!
//! Bodies are camelCase; the error envelope keeps `requires_upgrade` as is.
//! The caller's account comes from the `X-Account-Id` header, never from a
//! body.
//!
//! A submission, as sent to `POST /api/jobs`:
//!
//! ```json
//! {
//!   "filename": "talk.mp4",
//!   "videoFileUrl": "http://localhost:8080/files/videos/ana/1718000000000-talk.mp4",
//!   "videoDuration": 2.5,
//!   "captionOptions": { "language": "en", "style": "highlight", "maxWordsPerLine": 3 }
//! }
//! ```
//!
//! The pipeline reports back on `POST /api/webhooks/job-status`:
//!
//! ```json
//! {
//!   "jobId": 1718000000000123,
//!   "status": "complete",
//!   "outputCaptionFile": "https://cdn.example.com/talk.srt",
//!   "outputVideoFile": "https://cdn.example.com/talk.mp4"
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::captions::CaptionOptions;
use crate::ledger::{
    Account, BillingPlan, BillingRecord, BillingStatus, Job, JobId, JobStatus, PlanTier,
};
use crate::observability::MetricsSnapshot;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub requires_upgrade: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub metrics: MetricsSnapshot,
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRequest {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub plan_tier: PlanTier,
    pub total_minutes_captioned: f64,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            plan_tier: account.plan_tier,
            total_minutes_captioned: account.total_minutes,
            stripe_customer_id: account.stripe_customer_id,
            stripe_subscription_id: account.stripe_subscription_id,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub key: String,
    pub video_file_url: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: JobId,
    pub filename: String,
    pub video_file_url: String,
    pub video_duration: f64,
    pub watermarked: bool,
    pub status: JobStatus,
    pub output_caption_file: Option<String>,
    pub output_video_file: Option<String>,
    pub error_log: Option<String>,
    pub caption_options: CaptionOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            filename: job.filename,
            video_file_url: job.video_file_url,
            video_duration: job.duration_minutes,
            watermarked: job.watermarked,
            status: job.status,
            output_caption_file: job.outputs.caption_file,
            output_video_file: job.outputs.video_file,
            error_log: job.error_log,
            caption_options: job.caption_options,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Status callback from the captioning pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusUpdate {
    #[serde(deserialize_with = "job_id_from_number_or_string")]
    pub job_id: JobId,
    pub status: String,
    #[serde(default)]
    pub output_caption_file: Option<String>,
    #[serde(default)]
    pub output_video_file: Option<String>,
    #[serde(default)]
    pub error_log: Option<String>,
}

/// Automation tools send the id either as a number or as text
fn job_id_from_number_or_string<'de, D>(deserializer: D) -> Result<JobId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawJobId {
        Number(JobId),
        Text(String),
    }

    match RawJobId::deserialize(deserializer)? {
        RawJobId::Number(id) => Ok(id),
        RawJobId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid job id '{text}'"))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusAck {
    pub success: bool,
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(default)]
    pub plan: Option<BillingPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub subscription_id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventAck {
    pub received: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BillingRecordView {
    pub id: String,
    pub payment_ref: Option<String>,
    pub amount_cents: Option<i64>,
    pub plan: Option<BillingPlan>,
    pub status: BillingStatus,
    pub created_at: DateTime<Utc>,
}

impl From<BillingRecord> for BillingRecordView {
    fn from(record: BillingRecord) -> Self {
        Self {
            id: record.id,
            payment_ref: record.payment_ref,
            amount_cents: record.amount_cents,
            plan: record.plan,
            status: record.status,
            created_at: record.created_at,
        }
    }
}
