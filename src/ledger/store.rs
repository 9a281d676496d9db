use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::{LedgerError, Result};
use super::models::{
    Account, AccountPatch, Artifacts, BillingRecord, Job, JobId, JobStatus, NewJob,
};

/// Minutes to add to an account when a job commit lands.
#[derive(Debug, Clone, PartialEq)]
pub struct Credit {
    pub account_id: String,
    pub minutes: f64,
}

/// A guarded job status change, optionally carrying a usage credit.
///
/// Stores apply a transition as one unit: the job status is compared against
/// `expected`, and only on a match are the job fields and the credit written,
/// both or neither.
///
/// Every transition carries a unique `token` that is stored on the job it
/// writes, so a caller whose commit outcome is unknown can tell its own write
/// from another reporter's.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub token: Uuid,
    pub job_id: JobId,
    pub expected: JobStatus,
    pub status: JobStatus,
    pub outputs: Option<Artifacts>,
    pub error_log: Option<String>,
    pub credit: Option<Credit>,
    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn new(job_id: JobId, expected: JobStatus, status: JobStatus) -> Self {
        Self {
            token: Uuid::new_v4(),
            job_id,
            expected,
            status,
            outputs: None,
            error_log: None,
            credit: None,
            at: Utc::now(),
        }
    }

    /// Compare-and-set check shared by every backend.
    pub fn check(&self, job: &Job) -> Result<()> {
        if job.status != self.expected {
            return Err(LedgerError::Conflict {
                job_id: job.id,
                expected: self.expected,
                current: job.status,
            });
        }
        Ok(())
    }

    pub fn apply_to_job(&self, job: &mut Job) {
        job.status = self.status;
        if let Some(outputs) = &self.outputs {
            job.outputs = outputs.clone();
        }
        if let Some(error_log) = &self.error_log {
            job.error_log = Some(error_log.clone());
        }
        job.last_transition = Some(self.token);
        job.updated_at = self.at;
    }

    /// Whether `job` was last written by this transition
    pub fn landed_on(&self, job: &Job) -> bool {
        job.last_transition == Some(self.token)
    }

    pub fn apply_to_account(&self, account: &mut Account) {
        if let Some(credit) = &self.credit {
            account.total_minutes += credit.minutes;
            account.updated_at = self.at;
        }
    }
}

/// Persistence interface for accounts, jobs and billing history.
///
/// One canonical record shape for every backend; implementations differ only
/// in where and how the records live.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    async fn get_account(&self, id: &str) -> Result<Option<Account>>;

    /// Insert a new account; fails with `AccountExists` if the id is taken.
    async fn create_account(&self, account: &Account) -> Result<()>;

    async fn update_account(&self, id: &str, patch: &AccountPatch) -> Result<Account>;

    async fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<Account>>;

    /// Persist a new job in `pending` and return it with its assigned id.
    async fn create_job(&self, job: NewJob) -> Result<Job>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Jobs of one account, newest first.
    async fn list_jobs(&self, account_id: &str) -> Result<Vec<Job>>;

    /// Apply a guarded transition atomically and return the updated job.
    async fn commit_transition(&self, transition: &Transition) -> Result<Job>;

    async fn append_billing(&self, record: &BillingRecord) -> Result<()>;

    /// Billing records of one account, newest first.
    async fn list_billing(&self, account_id: &str) -> Result<Vec<BillingRecord>>;

    async fn health_check(&self) -> Result<()>;
}
