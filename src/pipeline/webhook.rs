//! HTTP webhook dispatcher with retry

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Dispatcher, PipelineError, PipelineEvent, Result, SubmissionPayload};
use crate::config::PipelineConfig;

/// Posts JSON to the automation service
pub struct WebhookDispatcher {
    client: Client,
    webhook_url: String,
    notify_url: Option<String>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl WebhookDispatcher {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let webhook_url = config
            .webhook_url
            .clone()
            .ok_or_else(|| PipelineError::InvalidConfig("webhook_url is not set".into()))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("boostframe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            webhook_url,
            notify_url: config.notify_url.clone(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// POST with retry on network errors, 5xx and 429
    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<()> {
        let max_attempts = self.max_retries + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.post_once(url, body).await {
                Ok(()) => {
                    if attempts > 1 {
                        debug!(url, attempts, "Webhook succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    warn!(url, attempts, error = %e, "Webhook rejected request");
                    return Err(e);
                }
                Err(e) => {
                    if attempts >= max_attempts {
                        warn!(url, attempts, error = %e, "Webhook failed after retries");
                        return Err(PipelineError::Exhausted {
                            attempts,
                            last: e.to_string(),
                        });
                    }

                    warn!(url, attempts, error = %e, "Webhook failed, retrying");

                    // Exponential backoff from the configured base
                    let backoff = self.retry_backoff * 2u32.pow(attempts - 1);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn post_once<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout
                } else {
                    PipelineError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    async fn dispatch(&self, payload: &SubmissionPayload) -> Result<()> {
        debug!(job_id = payload.job_id, "Dispatching job to pipeline");
        self.post(&self.webhook_url, payload).await
    }

    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        let Some(url) = &self.notify_url else {
            debug!(event = event.name(), "No notify_url configured, event dropped");
            return Ok(());
        };
        self.post(url, event).await
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
