use thiserror::Error;

use super::models::{JobId, JobStatus};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// The job was no longer in the status the caller read before committing.
    #[error("Job {job_id} is {current}, expected {expected}")]
    Conflict {
        job_id: JobId,
        expected: JobStatus,
        current: JobStatus,
    },

    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Record store rejected request: {0}")]
    Rejected(String),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
