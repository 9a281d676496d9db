//! Job status machine
//!
//! ```text
//! pending ──> processing ──> complete
//!    │            │    └───> failed
//!    │            └────────> blocked
//!    └──────> complete | failed | blocked
//! ```
//!
//! Terminal states accept nothing. The first commit into `complete` credits
//! the owning account with the job's duration in the same store transition.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::error::{LifecycleError, Result};
use crate::config::PipelineConfig;
use crate::humanize::format_minutes;
use crate::ledger::{
    Artifacts, Credit, Job, JobId, JobStatus, LedgerError, NewJob, RecordStore, Transition,
};
use crate::observability::Metrics;

/// Bounded retry for transient store failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Duration::from_millis(200),
        }
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_retries + 1,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.pow(attempt.saturating_sub(1).min(6))
    }
}

/// Status update reported by the pipeline
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusReport {
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub outputs: Artifacts,
    #[serde(default)]
    pub error_text: Option<String>,
}

impl StatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn complete(outputs: Artifacts) -> Self {
        Self {
            status: Some(JobStatus::Complete),
            outputs,
            error_text: None,
        }
    }

    pub fn failed(error_text: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            outputs: Artifacts::default(),
            error_text: Some(error_text.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// The transition was committed
    Applied { job: Job, credited: bool },
    /// Repeated `processing` report; nothing written
    Unchanged(Job),
}

impl ReportOutcome {
    pub fn job(&self) -> &Job {
        match self {
            ReportOutcome::Applied { job, .. } | ReportOutcome::Unchanged(job) => job,
        }
    }
}

pub struct LifecycleController {
    store: Arc<dyn RecordStore>,
    metrics: Arc<Metrics>,
    retry: RetryPolicy,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn RecordStore>, metrics: Arc<Metrics>, retry: RetryPolicy) -> Self {
        Self {
            store,
            metrics,
            retry,
        }
    }

    /// Persist a new job in `pending` for an existing account
    pub async fn create(&self, job: NewJob) -> Result<Job> {
        if !job.duration_minutes.is_finite() || job.duration_minutes <= 0.0 {
            return Err(LifecycleError::InvalidDuration(job.duration_minutes));
        }

        if self.store.get_account(&job.account_id).await?.is_none() {
            return Err(LifecycleError::UnknownAccount(job.account_id));
        }

        // Not retried: a lost response could otherwise create the job twice
        let job = self.store.create_job(job).await?;
        info!(
            job_id = job.id,
            account_id = %job.account_id,
            minutes = %format_minutes(job.duration_minutes),
            watermarked = job.watermarked,
            "Job created"
        );
        Ok(job)
    }

    /// `pending -> processing` after a successful dispatch
    pub async fn mark_dispatched(&self, job_id: JobId) -> Result<Job> {
        let transition = Transition::new(job_id, JobStatus::Pending, JobStatus::Processing);
        let mut saw_transient = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.store.commit_transition(&transition).await {
                Ok(job) => {
                    debug!(job_id, "Job dispatched");
                    return Ok(job);
                }
                Err(LedgerError::Conflict { current, .. }) => {
                    if saw_transient {
                        // An earlier attempt may have landed before its response was lost
                        let job = self.load(job_id).await?;
                        if transition.landed_on(&job) {
                            debug!(job_id, "Job dispatched");
                            return Ok(job);
                        }
                    }
                    return Err(LifecycleError::InvalidTransition {
                        job_id,
                        from: current,
                        to: JobStatus::Processing,
                    });
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    saw_transient = true;
                    self.back_off(job_id, attempt, &e).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply a status reported by the pipeline
    ///
    /// A commit that fails transiently may still have landed. Such attempts
    /// are kept, and a later read only counts as success when the job carries
    /// one of their tokens; a job finished by another reporter is rejected.
    pub async fn report_status(&self, job_id: JobId, report: StatusReport) -> Result<ReportOutcome> {
        let mut unsettled: Vec<Transition> = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let job = match self.store.get_job(job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => return Err(LifecycleError::NotFound(job_id)),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    self.back_off(job_id, attempt, &e).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(ours) = unsettled.iter().find(|t| t.landed_on(&job)) {
                debug!(job_id, "Earlier attempt committed before its response was lost");
                let target = ours.status;
                return Ok(self.applied(job, target));
            }

            let target = match report.status {
                Some(status) if status != JobStatus::Pending => status,
                requested => {
                    return Err(LifecycleError::InvalidTransition {
                        job_id,
                        from: job.status,
                        to: requested.unwrap_or(JobStatus::Pending),
                    });
                }
            };

            if job.status.is_terminal() {
                warn!(job_id, from = %job.status, to = %target, "Rejected update of finished job");
                return Err(LifecycleError::InvalidTransition {
                    job_id,
                    from: job.status,
                    to: target,
                });
            }

            if target == JobStatus::Processing && job.status == JobStatus::Processing {
                debug!(job_id, "Repeated processing report");
                return Ok(ReportOutcome::Unchanged(job));
            }

            let transition = self.transition_for(&job, target, &report)?;
            let committed = self.store.commit_transition(&transition).await;

            match committed {
                Ok(job) => return Ok(self.applied(job, target)),
                Err(LedgerError::Conflict { current, .. }) => {
                    // Lost a race; re-read and judge against the new status
                    debug!(job_id, %current, "Status changed underneath report, re-evaluating");
                    if attempt >= self.retry.max_attempts {
                        return Err(LifecycleError::InvalidTransition {
                            job_id,
                            from: current,
                            to: target,
                        });
                    }
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    self.back_off(job_id, attempt, &e).await;
                    unsettled.push(transition);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn transition_for(&self, job: &Job, target: JobStatus, report: &StatusReport) -> Result<Transition> {
        let mut transition = Transition::new(job.id, job.status, target);

        match target {
            JobStatus::Complete => {
                if report.outputs.is_empty() {
                    return Err(LifecycleError::MissingArtifacts(job.id));
                }
                transition.outputs = Some(report.outputs.clone());
                transition.credit = Some(Credit {
                    account_id: job.account_id.clone(),
                    minutes: job.duration_minutes,
                });
            }
            JobStatus::Failed | JobStatus::Blocked => {
                transition.error_log = report.error_text.clone();
                if !report.outputs.is_empty() {
                    transition.outputs = Some(report.outputs.clone());
                }
            }
            JobStatus::Processing | JobStatus::Pending => {}
        }

        Ok(transition)
    }

    fn applied(&self, job: Job, target: JobStatus) -> ReportOutcome {
        let credited = target == JobStatus::Complete;
        match target {
            JobStatus::Complete => {
                self.metrics.job_completed(job.duration_minutes);
                info!(
                    job_id = job.id,
                    account_id = %job.account_id,
                    minutes = %format_minutes(job.duration_minutes),
                    "Job complete, usage credited"
                );
            }
            JobStatus::Failed | JobStatus::Blocked => {
                self.metrics.job_failed();
                info!(
                    job_id = job.id,
                    status = %job.status,
                    error = job.error_log.as_deref().unwrap_or(""),
                    "Job finished without output"
                );
            }
            _ => debug!(job_id = job.id, status = %job.status, "Job status updated"),
        }
        ReportOutcome::Applied { job, credited }
    }

    async fn load(&self, job_id: JobId) -> Result<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(LifecycleError::NotFound(job_id))
    }

    async fn back_off(&self, job_id: JobId, attempt: u32, err: &LedgerError) {
        let delay = self.retry.delay(attempt);
        warn!(job_id, attempt, error = %err, ?delay, "Record store unavailable, retrying");
        tokio::time::sleep(delay).await;
    }
}
