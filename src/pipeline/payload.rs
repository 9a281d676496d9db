//! Wire shapes exchanged with the captioning pipeline (camelCase JSON)

use serde::Serialize;

use crate::captions::CaptionOptions;
use crate::ledger::{Account, Artifacts, Job, JobId, JobStatus, PlanTier};
use crate::metering::Limits;

/// Account figures attached to every outbound message
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub email: Option<String>,
    pub plan_tier: PlanTier,
    pub total_minutes_captioned: f64,
    pub free_minutes_remaining: f64,
    pub watermark_minutes_remaining: f64,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

impl UserSnapshot {
    pub fn new(account: &Account, limits: &Limits) -> Self {
        let usage = limits.summarize(account);
        Self {
            email: account.email.clone(),
            plan_tier: account.plan_tier,
            total_minutes_captioned: usage.total_minutes,
            free_minutes_remaining: usage.free_remaining,
            watermark_minutes_remaining: usage.watermark_remaining,
            stripe_customer_id: account.stripe_customer_id.clone(),
            stripe_subscription_id: account.stripe_subscription_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MinutesUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_job_minutes: Option<f64>,
    pub total_minutes_used: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_total_minutes: Option<f64>,
    pub free_allowance: f64,
    pub watermark_allowance: f64,
    pub is_paid_user: bool,
}

/// Body of the submission webhook
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub job_id: JobId,
    pub user_id: String,
    pub filename: String,
    pub video_file_url: String,
    pub video_duration: f64,
    pub watermarked: bool,
    pub caption_options: CaptionOptions,
    pub user: UserSnapshot,
    pub minutes_usage: MinutesUsage,
}

impl SubmissionPayload {
    /// Build from the freshly created job and the account snapshot the
    /// admission decision was made on.
    pub fn new(job: &Job, account: &Account, limits: &Limits) -> Self {
        Self {
            job_id: job.id,
            user_id: account.id.clone(),
            filename: job.filename.clone(),
            video_file_url: job.video_file_url.clone(),
            video_duration: job.duration_minutes,
            watermarked: job.watermarked,
            caption_options: job.caption_options.clone(),
            user: UserSnapshot::new(account, limits),
            minutes_usage: MinutesUsage {
                current_job_minutes: Some(job.duration_minutes),
                completed_job_minutes: None,
                total_minutes_used: account.total_minutes,
                new_total_minutes: Some(account.total_minutes + job.duration_minutes),
                free_allowance: limits.free,
                watermark_allowance: limits.watermark,
                is_paid_user: account.is_paid(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputFiles {
    pub caption_file: Option<String>,
    pub video_file: Option<String>,
}

impl From<&Artifacts> for OutputFiles {
    fn from(artifacts: &Artifacts) -> Self {
        Self {
            caption_file: artifacts.caption_file.clone(),
            video_file: artifacts.video_file.clone(),
        }
    }
}

/// Best-effort notifications about account and usage changes
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PipelineEvent {
    AccountCreated {
        user_id: String,
        user: UserSnapshot,
    },
    JobCompleted {
        job_id: JobId,
        user_id: String,
        status: JobStatus,
        video_duration: f64,
        user: UserSnapshot,
        minutes_usage: MinutesUsage,
        output_files: OutputFiles,
    },
}

impl PipelineEvent {
    pub fn account_created(account: &Account, limits: &Limits) -> Self {
        PipelineEvent::AccountCreated {
            user_id: account.id.clone(),
            user: UserSnapshot::new(account, limits),
        }
    }

    /// `account` is the state after the credit landed.
    pub fn job_completed(job: &Job, account: &Account, limits: &Limits) -> Self {
        PipelineEvent::JobCompleted {
            job_id: job.id,
            user_id: account.id.clone(),
            status: job.status,
            video_duration: job.duration_minutes,
            user: UserSnapshot::new(account, limits),
            minutes_usage: MinutesUsage {
                current_job_minutes: None,
                completed_job_minutes: Some(job.duration_minutes),
                total_minutes_used: account.total_minutes,
                new_total_minutes: None,
                free_allowance: limits.free,
                watermark_allowance: limits.watermark,
                is_paid_user: account.is_paid(),
            },
            output_files: OutputFiles::from(&job.outputs),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::AccountCreated { .. } => "account_created",
            PipelineEvent::JobCompleted { .. } => "job_completed",
        }
    }
}
