use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::error::{LedgerError, Result};
use super::models::{Account, AccountPatch, BillingRecord, Job, JobId, NewJob};
use super::partitions::{
    decode_account_job_key, encode_account_job_key, encode_account_job_prefix,
    encode_account_key, encode_billing_key, encode_billing_prefix, encode_customer_key,
    encode_job_key, encode_meta_key,
};
use super::store::{RecordStore, Transition};

const META_NEXT_JOB_ID: &str = "next_job_id";

/// Fjall-backed embedded record store
///
/// Writes that touch more than one record go through a single write batch, and
/// all read-check-write sequences hold `write_lock` so the status guard of a
/// transition observes the latest committed state.
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    accounts: PartitionHandle,
    jobs: PartitionHandle,
    account_jobs: PartitionHandle,
    customers: PartitionHandle,
    billing: PartitionHandle,
    metadata: PartitionHandle,
    next_job_id: Arc<AtomicU64>,
    write_lock: Arc<Mutex<()>>,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let accounts = keyspace.open_partition("accounts", PartitionCreateOptions::default())?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let account_jobs =
            keyspace.open_partition("account_jobs", PartitionCreateOptions::default())?;
        let customers = keyspace.open_partition("customers", PartitionCreateOptions::default())?;
        let billing = keyspace.open_partition("billing", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        // Job ids continue from the persisted counter across restarts
        let next_job_id = metadata
            .get(encode_meta_key(META_NEXT_JOB_ID))?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(1)
            .max(1);

        info!(next_job_id, "Fjall store opened successfully");
        Ok(Self {
            keyspace,
            accounts,
            jobs,
            account_jobs,
            customers,
            billing,
            metadata,
            next_job_id: Arc::new(AtomicU64::new(next_job_id)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        let mut account_count = 0;
        let mut job_count = 0;
        let mut billing_count = 0;

        for item in self.accounts.iter() {
            item?;
            account_count += 1;
        }

        for item in self.jobs.iter() {
            item?;
            job_count += 1;
        }

        for item in self.billing.iter() {
            item?;
            billing_count += 1;
        }

        Ok(StoreStats {
            account_count,
            job_count,
            billing_count,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read<T: DeserializeOwned>(partition: &PartitionHandle, key: Vec<u8>) -> Result<Option<T>> {
        match partition.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn read_account(&self, id: &str) -> Result<Option<Account>> {
        Self::read(&self.accounts, encode_account_key(id))
    }

    fn read_job(&self, id: JobId) -> Result<Option<Job>> {
        Self::read(&self.jobs, encode_job_key(id))
    }
}

#[async_trait]
impl RecordStore for FjallStore {
    fn backend(&self) -> &'static str {
        "fjall"
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        self.read_account(id)
    }

    async fn create_account(&self, account: &Account) -> Result<()> {
        let _guard = self.lock();

        if self.read_account(&account.id)?.is_some() {
            return Err(LedgerError::AccountExists(account.id.clone()));
        }

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.accounts,
            encode_account_key(&account.id),
            serde_json::to_vec(account)?,
        );
        if let Some(customer) = &account.stripe_customer_id {
            batch.insert(
                &self.customers,
                encode_customer_key(customer),
                account.id.as_bytes(),
            );
        }
        batch.commit()?;

        debug!(account_id = %account.id, "Created account");
        Ok(())
    }

    async fn update_account(&self, id: &str, patch: &AccountPatch) -> Result<Account> {
        let _guard = self.lock();

        let mut account = self
            .read_account(id)?
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;
        patch.apply(&mut account, Utc::now());

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.accounts,
            encode_account_key(id),
            serde_json::to_vec(&account)?,
        );
        if let Some(customer) = &patch.stripe_customer_id {
            batch.insert(&self.customers, encode_customer_key(customer), id.as_bytes());
        }
        batch.commit()?;

        debug!(account_id = %id, "Updated account");
        Ok(account)
    }

    async fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<Account>> {
        match self.customers.get(encode_customer_key(customer_id))? {
            Some(value) => {
                let account_id = String::from_utf8_lossy(&value).to_string();
                self.read_account(&account_id)
            }
            None => Ok(None),
        }
    }

    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let _guard = self.lock();

        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let job = job.into_job(id, Utc::now());

        let mut batch = self.keyspace.batch();
        batch.insert(&self.jobs, encode_job_key(id), serde_json::to_vec(&job)?);
        batch.insert(
            &self.account_jobs,
            encode_account_job_key(&job.account_id, id),
            Vec::<u8>::new(),
        );
        batch.insert(
            &self.metadata,
            encode_meta_key(META_NEXT_JOB_ID),
            (id + 1).to_be_bytes().to_vec(),
        );
        batch.commit()?;

        debug!(job_id = id, account_id = %job.account_id, "Created job");
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.read_job(id)
    }

    async fn list_jobs(&self, account_id: &str) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();

        for item in self
            .account_jobs
            .prefix(encode_account_job_prefix(account_id))
            .rev()
        {
            let (key, _) = item?;
            let Some(job_id) = decode_account_job_key(&key) else {
                continue;
            };
            // The prefix also matches accounts whose id extends this one
            if let Some(job) = self.read_job(job_id)? {
                if job.account_id == account_id {
                    jobs.push(job);
                }
            }
        }

        Ok(jobs)
    }

    async fn commit_transition(&self, transition: &Transition) -> Result<Job> {
        let _guard = self.lock();

        let mut job = self
            .read_job(transition.job_id)?
            .ok_or(LedgerError::JobNotFound(transition.job_id))?;
        transition.check(&job)?;
        transition.apply_to_job(&mut job);

        let mut batch = self.keyspace.batch();
        batch.insert(&self.jobs, encode_job_key(job.id), serde_json::to_vec(&job)?);

        if let Some(credit) = &transition.credit {
            let mut account = self
                .read_account(&credit.account_id)?
                .ok_or_else(|| LedgerError::AccountNotFound(credit.account_id.clone()))?;
            transition.apply_to_account(&mut account);
            batch.insert(
                &self.accounts,
                encode_account_key(&account.id),
                serde_json::to_vec(&account)?,
            );
        }

        batch.commit()?;

        debug!(
            job_id = job.id,
            status = %job.status,
            credited = transition.credit.is_some(),
            "Committed transition"
        );
        Ok(job)
    }

    async fn append_billing(&self, record: &BillingRecord) -> Result<()> {
        let key = encode_billing_key(
            &record.account_id,
            record.created_at.timestamp_millis(),
            &record.id,
        );
        self.billing.insert(key, serde_json::to_vec(record)?)?;
        debug!(account_id = %record.account_id, record_id = %record.id, "Appended billing record");
        Ok(())
    }

    async fn list_billing(&self, account_id: &str) -> Result<Vec<BillingRecord>> {
        let mut records = Vec::new();

        for item in self.billing.prefix(encode_billing_prefix(account_id)).rev() {
            let (_, value) = item?;
            let record: BillingRecord = serde_json::from_slice(&value)?;
            if record.account_id == account_id {
                records.push(record);
            }
        }

        Ok(records)
    }

    async fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(encode_meta_key(META_NEXT_JOB_ID))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub account_count: usize,
    pub job_count: usize,
    pub billing_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::CaptionOptions;
    use crate::ledger::models::{BillingStatus, JobStatus, PlanTier};
    use crate::ledger::store::Credit;
    use tempfile::TempDir;

    fn create_test_store() -> (FjallStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path().join("test_ledger")).unwrap();
        (store, temp_dir)
    }

    fn new_job(account_id: &str, minutes: f64) -> NewJob {
        NewJob {
            account_id: account_id.to_string(),
            filename: "clip.mp4".to_string(),
            video_file_url: "https://files.example.com/clip.mp4".to_string(),
            duration_minutes: minutes,
            watermarked: false,
            caption_options: CaptionOptions::default(),
        }
    }

    fn completion(job: &Job) -> Transition {
        let mut transition = Transition::new(job.id, job.status, JobStatus::Complete);
        transition.credit = Some(Credit {
            account_id: job.account_id.clone(),
            minutes: job.duration_minutes,
        });
        transition
    }

    #[tokio::test]
    async fn test_create_and_get_account() {
        let (store, _temp) = create_test_store();
        store.create_account(&Account::new("ana")).await.unwrap();

        let account = store.get_account("ana").await.unwrap().unwrap();
        assert_eq!(account.plan_tier, PlanTier::Free);
        assert!(store.get_account("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_account_twice_fails() {
        let (store, _temp) = create_test_store();
        store.create_account(&Account::new("ana")).await.unwrap();

        let err = store.create_account(&Account::new("ana")).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountExists(_)));
    }

    #[tokio::test]
    async fn test_customer_index_follows_patch() {
        let (store, _temp) = create_test_store();
        store.create_account(&Account::new("ana")).await.unwrap();

        let patch = AccountPatch {
            stripe_customer_id: Some("cus_123".to_string()),
            ..Default::default()
        };
        store.update_account("ana", &patch).await.unwrap();

        let found = store.find_account_by_customer("cus_123").await.unwrap();
        assert_eq!(found.map(|a| a.id), Some("ana".to_string()));
        assert!(store.find_account_by_customer("cus_x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_job_ids_are_sequential_and_listed_newest_first() {
        let (store, _temp) = create_test_store();
        let first = store.create_job(new_job("ana", 1.0)).await.unwrap();
        let second = store.create_job(new_job("ana", 2.0)).await.unwrap();
        store.create_job(new_job("bob", 3.0)).await.unwrap();

        assert_eq!(second.id, first.id + 1);
        assert_eq!(first.status, JobStatus::Pending);

        let jobs = store.list_jobs("ana").await.unwrap();
        let ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_job_counter_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger");

        let first_id = {
            let store = FjallStore::open(&path).unwrap();
            let job = store.create_job(new_job("ana", 1.0)).await.unwrap();
            store.persist().unwrap();
            job.id
        };

        let store = FjallStore::open(&path).unwrap();
        let job = store.create_job(new_job("ana", 1.0)).await.unwrap();
        assert_eq!(job.id, first_id + 1);
        assert!(store.get_job(first_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_completion_credits_account_once() {
        let (store, _temp) = create_test_store();
        let mut account = Account::new("ana");
        account.total_minutes = 4.0;
        store.create_account(&account).await.unwrap();

        let job = store.create_job(new_job("ana", 2.0)).await.unwrap();
        let transition = completion(&job);

        let updated = store.commit_transition(&transition).await.unwrap();
        assert_eq!(updated.status, JobStatus::Complete);

        let err = store.commit_transition(&transition).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Conflict {
                current: JobStatus::Complete,
                ..
            }
        ));

        let account = store.get_account("ana").await.unwrap().unwrap();
        assert_eq!(account.total_minutes, 6.0);
    }

    #[tokio::test]
    async fn test_credit_for_missing_account_leaves_job_untouched() {
        let (store, _temp) = create_test_store();
        let job = store.create_job(new_job("ghost", 2.0)).await.unwrap();

        let err = store.commit_transition(&completion(&job)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_billing_history() {
        let (store, _temp) = create_test_store();
        let mut first = BillingRecord::new("ana", BillingStatus::Succeeded);
        first.created_at = Utc::now() - chrono::Duration::days(30);
        let second = BillingRecord::new("ana", BillingStatus::Canceled);

        store.append_billing(&first).await.unwrap();
        store.append_billing(&second).await.unwrap();
        store
            .append_billing(&BillingRecord::new("bob", BillingStatus::Succeeded))
            .await
            .unwrap();

        let records = store.list_billing("ana").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, BillingStatus::Canceled);

        let stats = store.stats().unwrap();
        assert_eq!(stats.billing_count, 3);
    }
}
