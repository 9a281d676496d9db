//! In-process record store for development and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::error::{LedgerError, Result};
use super::models::{Account, AccountPatch, BillingRecord, Job, JobId, NewJob};
use super::store::{RecordStore, Transition};

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    jobs: BTreeMap<JobId, Job>,
    billing: Vec<BillingRecord>,
    next_job_id: JobId,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.tables.lock().await.accounts.get(id).cloned())
    }

    async fn create_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.accounts.contains_key(&account.id) {
            return Err(LedgerError::AccountExists(account.id.clone()));
        }
        tables.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn update_account(&self, id: &str, patch: &AccountPatch) -> Result<Account> {
        let mut tables = self.tables.lock().await;
        let account = tables
            .accounts
            .get_mut(id)
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;
        patch.apply(account, Utc::now());
        Ok(account.clone())
    }

    async fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let mut tables = self.tables.lock().await;
        tables.next_job_id += 1;
        let job = job.into_job(tables.next_job_id, Utc::now());
        tables.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.tables.lock().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, account_id: &str) -> Result<Vec<Job>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .values()
            .rev()
            .filter(|job| job.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn commit_transition(&self, transition: &Transition) -> Result<Job> {
        let mut tables = self.tables.lock().await;

        let mut job = tables
            .jobs
            .get(&transition.job_id)
            .cloned()
            .ok_or(LedgerError::JobNotFound(transition.job_id))?;
        transition.check(&job)?;
        transition.apply_to_job(&mut job);

        // Resolve the account before writing anything so a missing account
        // leaves the job untouched.
        let account = match &transition.credit {
            Some(credit) => {
                let mut account = tables
                    .accounts
                    .get(&credit.account_id)
                    .cloned()
                    .ok_or_else(|| LedgerError::AccountNotFound(credit.account_id.clone()))?;
                transition.apply_to_account(&mut account);
                Some(account)
            }
            None => None,
        };

        if let Some(account) = account {
            tables.accounts.insert(account.id.clone(), account);
        }
        tables.jobs.insert(job.id, job.clone());

        Ok(job)
    }

    async fn append_billing(&self, record: &BillingRecord) -> Result<()> {
        self.tables.lock().await.billing.push(record.clone());
        Ok(())
    }

    async fn list_billing(&self, account_id: &str) -> Result<Vec<BillingRecord>> {
        let tables = self.tables.lock().await;
        let mut records: Vec<BillingRecord> = tables
            .billing
            .iter()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::CaptionOptions;
    use crate::ledger::models::JobStatus;
    use crate::ledger::store::Credit;

    #[tokio::test]
    async fn test_failed_job_does_not_credit() {
        let store = MemoryStore::new();
        store.create_account(&Account::new("ana")).await.unwrap();
        let job = store
            .create_job(NewJob {
                account_id: "ana".to_string(),
                filename: "a.mp4".to_string(),
                video_file_url: "https://files.example.com/a.mp4".to_string(),
                duration_minutes: 1.5,
                watermarked: false,
                caption_options: CaptionOptions::default(),
            })
            .await
            .unwrap();

        let mut failed = Transition::new(job.id, JobStatus::Pending, JobStatus::Failed);
        failed.error_log = Some("no audio track".to_string());
        store.commit_transition(&failed).await.unwrap();

        let mut complete = Transition::new(job.id, JobStatus::Pending, JobStatus::Complete);
        complete.credit = Some(Credit {
            account_id: "ana".to_string(),
            minutes: 1.5,
        });
        let err = store.commit_transition(&complete).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));

        let account = store.get_account("ana").await.unwrap().unwrap();
        assert_eq!(account.total_minutes, 0.0);
        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.error_log.as_deref(), Some("no audio track"));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = MemoryStore::new();
        let transition = Transition::new(99, JobStatus::Pending, JobStatus::Processing);
        assert!(matches!(
            store.commit_transition(&transition).await,
            Err(LedgerError::JobNotFound(99))
        ));
    }
}
