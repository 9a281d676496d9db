use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::controller::{LifecycleController, ReportOutcome, StatusReport};
use super::error::{LifecycleError, Result};
use crate::captions::CaptionOptions;
use crate::humanize::wait_estimate;
use crate::ledger::{JobId, JobStatus, NewJob, RecordStore};
use crate::metering::Limits;
use crate::observability::Metrics;
use crate::pipeline::{Dispatcher, PipelineEvent, SubmissionPayload};
use crate::storage::VideoStorage;

/// A caption job request from an account
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(skip)]
    pub account_id: String,
    pub filename: String,
    pub video_file_url: String,
    pub video_duration: f64,
    #[serde(default)]
    pub caption_options: CaptionOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
    pub watermarked: bool,
    pub estimated_wait_time: String,
}

pub struct SubmissionService {
    store: Arc<dyn RecordStore>,
    controller: Arc<LifecycleController>,
    dispatcher: Arc<dyn Dispatcher>,
    storage: Option<VideoStorage>,
    limits: Limits,
    metrics: Arc<Metrics>,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        controller: Arc<LifecycleController>,
        dispatcher: Arc<dyn Dispatcher>,
        limits: Limits,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            controller,
            dispatcher,
            storage: None,
            limits,
            metrics,
        }
    }

    /// Check that video URLs pointing at our own storage resolve to an object
    pub fn with_storage(mut self, storage: VideoStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReceipt> {
        let duration = submission.video_duration;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(LifecycleError::InvalidDuration(duration));
        }
        if submission.filename.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest("filename is required".into()));
        }
        if submission.video_file_url.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest(
                "videoFileUrl is required".into(),
            ));
        }
        submission
            .caption_options
            .validate()
            .map_err(|e| LifecycleError::InvalidRequest(e.to_string()))?;

        let account = self
            .store
            .get_account(&submission.account_id)
            .await?
            .ok_or_else(|| LifecycleError::UnknownAccount(submission.account_id.clone()))?;

        let admission = self
            .limits
            .admit(account.total_minutes, duration, account.is_paid());
        if !admission.allowed {
            self.metrics.job_rejected();
            info!(
                account_id = %account.id,
                used = account.total_minutes,
                requested = duration,
                "Submission rejected, upgrade required"
            );
            return Err(LifecycleError::UpgradeRequired {
                used: account.total_minutes,
                requested: duration,
                limit: self.limits.watermark,
            });
        }

        self.verify_upload(&submission.video_file_url).await?;

        let job = self
            .controller
            .create(NewJob {
                account_id: account.id.clone(),
                filename: submission.filename,
                video_file_url: submission.video_file_url,
                duration_minutes: duration,
                watermarked: admission.watermarked,
                caption_options: submission.caption_options,
            })
            .await?;
        self.metrics.job_submitted();

        let payload = SubmissionPayload::new(&job, &account, &self.limits);
        let status = match self.dispatcher.dispatch(&payload).await {
            Ok(()) => match self.controller.mark_dispatched(job.id).await {
                Ok(job) => job.status,
                // The pipeline owns the job now; its callbacks advance it from pending
                Err(e) => {
                    warn!(job_id = job.id, error = %e, "Job dispatched but not marked processing");
                    JobStatus::Pending
                }
            },
            Err(e) => {
                warn!(job_id = job.id, error = %e, "Dispatch to pipeline failed");
                let report = StatusReport::failed(format!("Webhook error: {e}"));
                self.controller
                    .report_status(job.id, report)
                    .await?
                    .job()
                    .status
            }
        };

        Ok(SubmissionReceipt {
            job_id: job.id,
            status,
            watermarked: job.watermarked,
            estimated_wait_time: wait_estimate(duration),
        })
    }

    /// Apply a pipeline status report; completions are announced best-effort
    pub async fn report(&self, job_id: JobId, report: StatusReport) -> Result<ReportOutcome> {
        let outcome = self.controller.report_status(job_id, report).await?;

        if let ReportOutcome::Applied {
            job,
            credited: true,
        } = &outcome
        {
            match self.store.get_account(&job.account_id).await {
                Ok(Some(account)) => {
                    let event = PipelineEvent::job_completed(job, &account, &self.limits);
                    let dispatcher = self.dispatcher.clone();
                    let job_id = job.id;
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.notify(&event).await {
                            warn!(job_id, error = %e, "Failed to send job_completed event");
                        }
                    });
                }
                Ok(None) => warn!(job_id = job.id, "Account vanished after completion"),
                Err(e) => warn!(job_id = job.id, error = %e, "Skipping job_completed event"),
            }
        }

        Ok(outcome)
    }

    async fn verify_upload(&self, video_file_url: &str) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let Some(key) = storage.key_for_url(video_file_url) else {
            // Hosted elsewhere
            return Ok(());
        };

        match storage.exists(key).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(LifecycleError::InvalidRequest(format!(
                "uploaded video not found: {key}"
            ))),
            Err(e) => Err(LifecycleError::UpstreamUnavailable(e.to_string())),
        }
    }
}
