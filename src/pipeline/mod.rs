//! Outbound calls to the captioning pipeline
//!
//! Submissions go to the automation webhook and must succeed for a job to
//! leave `pending`. Events are fire-and-forget notifications; a failure is
//! logged and never affects the caller.

pub mod payload;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use payload::{MinutesUsage, OutputFiles, PipelineEvent, SubmissionPayload, UserSnapshot};
pub use webhook::WebhookDispatcher;

use crate::config::PipelineConfig;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Webhook timed out")]
    Timeout,

    #[error("Webhook responded with HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Invalid webhook configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Server-side and network failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::RequestFailed(_) | PipelineError::Timeout => true,
            PipelineError::Status { status, .. } => *status >= 500 || *status == 429,
            PipelineError::Exhausted { .. } | PipelineError::InvalidConfig(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Hands jobs and events to the captioning pipeline
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Submit a job for processing
    async fn dispatch(&self, payload: &SubmissionPayload) -> Result<()>;

    /// Send a notification event
    async fn notify(&self, event: &PipelineEvent) -> Result<()>;

    /// Short name for logs and health output
    fn name(&self) -> &'static str;
}

/// Dispatcher used when no webhook is configured; submissions succeed
/// immediately and are only logged.
#[derive(Debug, Clone, Default)]
pub struct LogOnlyDispatcher;

impl LogOnlyDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dispatcher for LogOnlyDispatcher {
    async fn dispatch(&self, payload: &SubmissionPayload) -> Result<()> {
        tracing::info!(
            job_id = payload.job_id,
            account_id = %payload.user_id,
            watermarked = payload.watermarked,
            "No pipeline webhook configured, submission logged only"
        );
        Ok(())
    }

    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        tracing::debug!(event = event.name(), "Pipeline event logged only");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log-only"
    }
}

/// Build the dispatcher described by `[pipeline]`
pub fn from_config(config: &PipelineConfig) -> Result<Arc<dyn Dispatcher>> {
    match config.webhook_url {
        Some(_) => Ok(Arc::new(WebhookDispatcher::new(config)?)),
        None => {
            tracing::warn!("pipeline.webhook_url not set, submissions will only be logged");
            Ok(Arc::new(LogOnlyDispatcher::new()))
        }
    }
}
