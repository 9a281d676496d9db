use thiserror::Error;

use crate::ledger::{JobId, JobStatus, LedgerError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid duration: {0} (must be a positive number of minutes)")]
    InvalidDuration(f64),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {0} reported complete without output files")]
    MissingArtifacts(JobId),

    #[error(
        "Usage limit would be exceeded ({used} + {requested} > {limit} minutes). Please upgrade to continue."
    )]
    UpgradeRequired {
        used: f64,
        requested: f64,
        limit: f64,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Record store error: {0}")]
    Store(LedgerError),
}

impl From<LedgerError> for LifecycleError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::JobNotFound(id) => LifecycleError::NotFound(id),
            LedgerError::AccountNotFound(id) => LifecycleError::UnknownAccount(id),
            LedgerError::Unavailable(reason) => LifecycleError::UpstreamUnavailable(reason),
            other => LifecycleError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
