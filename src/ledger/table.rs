//! Record store backed by an external spreadsheet-style table service.
//!
//! Speaks the Airtable-compatible REST dialect:
//! - `GET  {base_url}/v0/{base_id}/{table}?filterByFormula=..` -> `{ records, offset? }`
//! - `POST {base_url}/v0/{base_id}/{table}` with `{ fields }` -> record
//! - `PATCH {base_url}/v0/{base_id}/{table}/{record_id}` with `{ fields }` -> record
//!
//! Column names live in the `*Fields` structs below and nowhere else.
//!
//! The service has no multi-record transactions. A completing transition
//! therefore writes the usage credit first, recording the job id in the
//! account's `Credited Jobs` column within the same single-record update, and
//! then writes the job status. When the job write fails the credit is
//! reverted, unless a re-read shows the job write landed after all. If even
//! that re-read fails the credit stays marked: a retried completion finds it
//! and skips the increment, and a `failed`/`blocked` commit reverses it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{LedgerError, Result};
use super::models::{
    Account, AccountPatch, Artifacts, BillingRecord, Job, JobId, JobStatus, NewJob, PlanTier,
};
use super::store::{Credit, RecordStore, Transition};
use crate::captions::CaptionOptions;
use crate::config::TableStoreConfig;

const JOB_ID_ATTEMPTS: u32 = 5;
const UNDO_ATTEMPTS: u32 = 5;
const UNDO_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct RecordList<F> {
    records: Vec<Record<F>>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Record<F> {
    id: String,
    fields: F,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct AccountFields {
    #[serde(rename = "Account ID")]
    account_id: String,
    #[serde(rename = "Email", default)]
    email: Option<String>,
    #[serde(rename = "First Name", default)]
    first_name: Option<String>,
    #[serde(rename = "Last Name", default)]
    last_name: Option<String>,
    #[serde(rename = "Plan Tier", default)]
    plan_tier: Option<String>,
    #[serde(rename = "Total Minutes Captioned", default)]
    total_minutes: f64,
    #[serde(rename = "Stripe Customer ID", default)]
    stripe_customer_id: Option<String>,
    #[serde(rename = "Stripe Subscription ID", default)]
    stripe_subscription_id: Option<String>,
    /// Comma-separated ids of jobs whose minutes are included in the total
    #[serde(rename = "Credited Jobs", default)]
    credited_jobs: Option<String>,
    #[serde(rename = "Created At", default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(rename = "Updated At", default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct JobFields {
    #[serde(rename = "Job ID")]
    job_id: JobId,
    #[serde(rename = "Account ID")]
    account_id: String,
    #[serde(rename = "Video File Name", default)]
    filename: String,
    #[serde(rename = "Video File URL", default)]
    video_file_url: String,
    #[serde(rename = "Video Duration", default)]
    duration_minutes: f64,
    // Unchecked checkboxes are omitted from responses
    #[serde(rename = "Watermarked", default)]
    watermarked: bool,
    #[serde(rename = "Status", default)]
    status: Option<String>,
    #[serde(rename = "Output Caption File", default)]
    output_caption_file: Option<String>,
    #[serde(rename = "Output Video File", default)]
    output_video_file: Option<String>,
    #[serde(rename = "Caption Options", default)]
    caption_options: Option<String>,
    #[serde(rename = "Error Log", default)]
    error_log: Option<String>,
    #[serde(rename = "Last Transition", default)]
    last_transition: Option<String>,
    #[serde(rename = "Created At", default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(rename = "Updated At", default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct BillingFields {
    #[serde(rename = "Billing ID")]
    billing_id: String,
    #[serde(rename = "Account ID")]
    account_id: String,
    #[serde(rename = "Payment Reference", default)]
    payment_ref: Option<String>,
    #[serde(rename = "Amount", default)]
    amount_cents: Option<i64>,
    #[serde(rename = "Plan", default)]
    plan: Option<String>,
    #[serde(rename = "Status", default)]
    status: Option<String>,
    #[serde(rename = "Created At", default)]
    created_at: Option<DateTime<Utc>>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_credited(value: Option<&str>) -> Vec<JobId> {
    value
        .unwrap_or_default()
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

fn join_credited(ids: &[JobId]) -> String {
    ids.iter()
        .map(JobId::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// The two usage columns, always written together.
fn usage_fields(total_minutes: f64, credited: &[JobId], at: DateTime<Utc>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("Total Minutes Captioned".into(), json!(total_minutes));
    fields.insert("Credited Jobs".into(), json!(join_credited(credited)));
    fields.insert("Updated At".into(), json!(at));
    fields
}

/// Usage columns of an account without one job's credit
struct CreditUndo {
    record_id: String,
    total_minutes: f64,
    credited: Vec<JobId>,
}

impl AccountFields {
    fn from_account(account: &Account) -> Self {
        Self {
            account_id: account.id.clone(),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            plan_tier: Some(account.plan_tier.to_string()),
            total_minutes: account.total_minutes,
            stripe_customer_id: account.stripe_customer_id.clone(),
            stripe_subscription_id: account.stripe_subscription_id.clone(),
            credited_jobs: None,
            created_at: Some(account.created_at),
            updated_at: Some(account.updated_at),
        }
    }

    fn into_account(self) -> (Account, Vec<JobId>) {
        let credited = parse_credited(self.credited_jobs.as_deref());
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let account = Account {
            id: self.account_id,
            email: non_empty(self.email),
            first_name: non_empty(self.first_name),
            last_name: non_empty(self.last_name),
            plan_tier: self
                .plan_tier
                .as_deref()
                .and_then(|tier| tier.parse().ok())
                .unwrap_or(PlanTier::Free),
            total_minutes: self.total_minutes.max(0.0),
            stripe_customer_id: non_empty(self.stripe_customer_id),
            stripe_subscription_id: non_empty(self.stripe_subscription_id),
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        };
        (account, credited)
    }
}

/// Only the columns a patch touches, so a profile update never rewrites the
/// minutes total concurrently maintained by transition commits.
fn patch_fields(patch: &AccountPatch, at: DateTime<Utc>) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(email) = &patch.email {
        fields.insert("Email".into(), json!(email));
    }
    if let Some(first_name) = &patch.first_name {
        fields.insert("First Name".into(), json!(first_name));
    }
    if let Some(last_name) = &patch.last_name {
        fields.insert("Last Name".into(), json!(last_name));
    }
    if let Some(tier) = patch.plan_tier {
        fields.insert("Plan Tier".into(), json!(tier.as_str()));
    }
    if let Some(customer) = &patch.stripe_customer_id {
        fields.insert("Stripe Customer ID".into(), json!(customer));
    }
    if let Some(subscription) = &patch.stripe_subscription_id {
        fields.insert("Stripe Subscription ID".into(), json!(subscription));
    }
    fields.insert("Updated At".into(), json!(at));
    fields
}

impl JobFields {
    fn from_job(job: &Job) -> Result<Self> {
        Ok(Self {
            job_id: job.id,
            account_id: job.account_id.clone(),
            filename: job.filename.clone(),
            video_file_url: job.video_file_url.clone(),
            duration_minutes: job.duration_minutes,
            watermarked: job.watermarked,
            status: Some(job.status.to_string()),
            output_caption_file: job.outputs.caption_file.clone(),
            output_video_file: job.outputs.video_file.clone(),
            caption_options: Some(serde_json::to_string(&job.caption_options)?),
            error_log: job.error_log.clone(),
            last_transition: job.last_transition.map(|token| token.to_string()),
            created_at: Some(job.created_at),
            updated_at: Some(job.updated_at),
        })
    }

    fn into_job(self) -> Result<Job> {
        let status = match self.status.as_deref() {
            Some(status) => status.parse().map_err(LedgerError::Malformed)?,
            None => JobStatus::Pending,
        };
        let caption_options = match non_empty(self.caption_options) {
            Some(raw) => serde_json::from_str(&raw)?,
            None => CaptionOptions::default(),
        };
        let created_at = self.created_at.unwrap_or_else(Utc::now);

        Ok(Job {
            id: self.job_id,
            account_id: self.account_id,
            filename: self.filename,
            video_file_url: self.video_file_url,
            duration_minutes: self.duration_minutes,
            watermarked: self.watermarked,
            status,
            outputs: Artifacts {
                caption_file: non_empty(self.output_caption_file),
                video_file: non_empty(self.output_video_file),
            },
            caption_options,
            error_log: non_empty(self.error_log),
            last_transition: non_empty(self.last_transition).and_then(|t| t.parse::<Uuid>().ok()),
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        })
    }
}

/// Columns a transition may change on a job row.
fn transition_fields(job: &Job) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("Status".into(), json!(job.status.as_str()));
    fields.insert("Output Caption File".into(), json!(job.outputs.caption_file));
    fields.insert("Output Video File".into(), json!(job.outputs.video_file));
    fields.insert("Error Log".into(), json!(job.error_log));
    fields.insert(
        "Last Transition".into(),
        json!(job.last_transition.map(|token| token.to_string())),
    );
    fields.insert("Updated At".into(), json!(job.updated_at));
    fields
}

impl BillingFields {
    fn from_record(record: &BillingRecord) -> Self {
        Self {
            billing_id: record.id.clone(),
            account_id: record.account_id.clone(),
            payment_ref: record.payment_ref.clone(),
            amount_cents: record.amount_cents,
            plan: record.plan.map(|p| p.as_str().to_string()),
            status: Some(record.status.as_str().to_string()),
            created_at: Some(record.created_at),
        }
    }

    fn into_record(self) -> Result<BillingRecord> {
        let status = self
            .status
            .as_deref()
            .ok_or_else(|| LedgerError::Malformed(format!("billing {} has no status", self.billing_id)))?
            .parse()
            .map_err(LedgerError::Malformed)?;

        Ok(BillingRecord {
            id: self.billing_id,
            account_id: self.account_id,
            payment_ref: non_empty(self.payment_ref),
            amount_cents: self.amount_cents,
            plan: self.plan.as_deref().and_then(|p| p.parse().ok()),
            status,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Quote a string literal for a table-service formula.
fn formula_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub struct TableStore {
    http: Client,
    base_url: String,
    api_key: String,
    accounts_table: String,
    jobs_table: String,
    billing_table: String,
    commit_lock: Mutex<()>,
}

impl TableStore {
    pub fn from_config(config: &TableStoreConfig) -> Result<Self> {
        let base_id = config
            .base_id
            .clone()
            .ok_or_else(|| LedgerError::Rejected("table store base_id is not configured".into()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LedgerError::Rejected("TABLE_API_KEY is not set".into()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("boostframe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let base_url = format!("{}/v0/{}", config.base_url.trim_end_matches('/'), base_id);
        info!(%base_url, "Using table service record store");

        Ok(Self {
            http,
            base_url,
            api_key,
            accounts_table: config.accounts_table.clone(),
            jobs_table: config.jobs_table.clone(),
            billing_table: config.billing_table.clone(),
            commit_lock: Mutex::new(()),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status.as_u16(), body);
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                LedgerError::Unavailable(message)
            } else {
                LedgerError::Rejected(message)
            });
        }

        response
            .json()
            .await
            .map_err(|e| LedgerError::Malformed(e.to_string()))
    }

    async fn select<F: DeserializeOwned>(
        &self,
        table: &str,
        formula: &str,
        max_records: Option<usize>,
    ) -> Result<Vec<Record<F>>> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query = vec![("filterByFormula", formula.to_string())];
            if let Some(max) = max_records {
                query.push(("maxRecords", max.to_string()));
            }
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }

            let page: RecordList<F> = self
                .send(self.http.get(self.table_url(table)).query(&query))
                .await?;
            records.extend(page.records);

            match page.offset {
                Some(next) if max_records.is_none_or(|max| records.len() < max) => {
                    offset = Some(next)
                }
                _ => break,
            }
        }

        Ok(records)
    }

    async fn insert<F: Serialize>(&self, table: &str, fields: &F) -> Result<()> {
        let _: Value = self
            .send(
                self.http
                    .post(self.table_url(table))
                    .json(&json!({ "fields": fields, "typecast": true })),
            )
            .await?;
        Ok(())
    }

    async fn update(&self, table: &str, record_id: &str, fields: Map<String, Value>) -> Result<Value> {
        self.send(
            self.http
                .patch(format!("{}/{}", self.table_url(table), record_id))
                .json(&json!({ "fields": fields, "typecast": true })),
        )
        .await
    }

    async fn find_account(&self, id: &str) -> Result<Option<(String, Account, Vec<JobId>)>> {
        let formula = format!("{{Account ID}} = {}", formula_literal(id));
        let records = self
            .select::<AccountFields>(&self.accounts_table, &formula, Some(1))
            .await?;

        Ok(records.into_iter().next().map(|record| {
            let (account, credited) = record.fields.into_account();
            (record.id, account, credited)
        }))
    }

    /// Rows carrying a job id; more than one is a corrupt table.
    async fn find_jobs(&self, id: JobId) -> Result<Vec<Record<JobFields>>> {
        let formula = format!("{{Job ID}} = {}", id);
        self.select::<JobFields>(&self.jobs_table, &formula, Some(2)).await
    }

    async fn find_job(&self, id: JobId) -> Result<Option<(String, Job)>> {
        let mut records = self.find_jobs(id).await?;
        if records.len() > 1 {
            return Err(LedgerError::Malformed(format!(
                "{} rows carry job id {}",
                records.len(),
                id
            )));
        }

        match records.pop() {
            Some(record) => Ok(Some((record.id, record.fields.into_job()?))),
            None => Ok(None),
        }
    }

    /// Add the job's minutes to its account unless already marked, and return
    /// the usage columns as they are without this job.
    async fn write_credit(&self, job: &Job, credit: &Credit, at: DateTime<Utc>) -> Result<CreditUndo> {
        let (record_id, account, mut credited) = self
            .find_account(&credit.account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(credit.account_id.clone()))?;

        if credited.contains(&job.id) {
            debug!(job_id = job.id, "Credit already recorded, skipping");
            credited.retain(|id| *id != job.id);
            return Ok(CreditUndo {
                record_id,
                total_minutes: (account.total_minutes - credit.minutes).max(0.0),
                credited,
            });
        }

        let undo = CreditUndo {
            record_id: record_id.clone(),
            total_minutes: account.total_minutes,
            credited: credited.clone(),
        };
        credited.push(job.id);
        self.update(
            &self.accounts_table,
            &record_id,
            usage_fields(account.total_minutes + credit.minutes, &credited, at),
        )
        .await?;
        Ok(undo)
    }

    /// Put the usage columns back after a failed job write.
    async fn undo_credit(&self, job_id: JobId, undo: CreditUndo) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let fields = usage_fields(undo.total_minutes, &undo.credited, Utc::now());
            match self.update(&self.accounts_table, &undo.record_id, fields).await {
                Ok(_) => {
                    warn!(job_id, "Job write failed, usage credit reverted");
                    return;
                }
                Err(e) if e.is_transient() && attempt < UNDO_ATTEMPTS => {
                    tokio::time::sleep(UNDO_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => {
                    error!(
                        job_id,
                        attempt,
                        error = %e,
                        "Could not revert usage credit, left marked for a later commit"
                    );
                    return;
                }
            }
        }
    }

    /// Drop a credit left behind by a completion whose job write never landed.
    async fn reverse_stale_credit(&self, job: &Job, at: DateTime<Utc>) -> Result<()> {
        let Some((record_id, account, mut credited)) = self.find_account(&job.account_id).await?
        else {
            return Ok(());
        };
        if !credited.contains(&job.id) {
            return Ok(());
        }

        credited.retain(|id| *id != job.id);
        let total = (account.total_minutes - job.duration_minutes).max(0.0);
        self.update(&self.accounts_table, &record_id, usage_fields(total, &credited, at))
            .await?;
        warn!(job_id = job.id, account_id = %job.account_id, "Reversed stale usage credit");
        Ok(())
    }

    /// Millisecond timestamp with a random sub-millisecond suffix.
    fn generate_job_id() -> JobId {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let suffix = (Uuid::new_v4().as_u128() % 1000) as u64;
        millis * 1000 + suffix
    }
}

#[async_trait]
impl RecordStore for TableStore {
    fn backend(&self) -> &'static str {
        "table"
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.find_account(id).await?.map(|(_, account, _)| account))
    }

    async fn create_account(&self, account: &Account) -> Result<()> {
        if self.find_account(&account.id).await?.is_some() {
            return Err(LedgerError::AccountExists(account.id.clone()));
        }
        self.insert(&self.accounts_table, &AccountFields::from_account(account))
            .await?;
        debug!(account_id = %account.id, "Created account record");
        Ok(())
    }

    async fn update_account(&self, id: &str, patch: &AccountPatch) -> Result<Account> {
        let (record_id, mut account, _) = self
            .find_account(id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;

        let at = Utc::now();
        self.update(&self.accounts_table, &record_id, patch_fields(patch, at))
            .await?;
        patch.apply(&mut account, at);
        Ok(account)
    }

    async fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<Account>> {
        let formula = format!("{{Stripe Customer ID}} = {}", formula_literal(customer_id));
        let records = self
            .select::<AccountFields>(&self.accounts_table, &formula, Some(1))
            .await?;
        Ok(records
            .into_iter()
            .next()
            .map(|record| record.fields.into_account().0))
    }

    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let _guard = self.commit_lock.lock().await;

        let mut id = Self::generate_job_id();
        let mut attempt = 1;
        while !self.find_jobs(id).await?.is_empty() {
            if attempt >= JOB_ID_ATTEMPTS {
                return Err(LedgerError::Rejected(format!(
                    "no free job id after {attempt} attempts"
                )));
            }
            debug!(job_id = id, "Job id taken, drawing another");
            attempt += 1;
            id = Self::generate_job_id();
        }

        let job = job.into_job(id, Utc::now());
        self.insert(&self.jobs_table, &JobFields::from_job(&job)?).await?;
        debug!(job_id = job.id, account_id = %job.account_id, "Created job record");
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.find_job(id).await?.map(|(_, job)| job))
    }

    async fn list_jobs(&self, account_id: &str) -> Result<Vec<Job>> {
        let formula = format!("{{Account ID}} = {}", formula_literal(account_id));
        let records = self.select::<JobFields>(&self.jobs_table, &formula, None).await?;

        let mut jobs = records
            .into_iter()
            .map(|record| record.fields.into_job())
            .collect::<Result<Vec<_>>>()?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn commit_transition(&self, transition: &Transition) -> Result<Job> {
        let _guard = self.commit_lock.lock().await;

        let (job_record, mut job) = self
            .find_job(transition.job_id)
            .await?
            .ok_or(LedgerError::JobNotFound(transition.job_id))?;
        transition.check(&job)?;

        let undo = match &transition.credit {
            Some(credit) => Some(self.write_credit(&job, credit, transition.at).await?),
            None => {
                if transition.status.is_terminal() {
                    self.reverse_stale_credit(&job, transition.at).await?;
                }
                None
            }
        };

        transition.apply_to_job(&mut job);
        if let Err(e) = self
            .update(&self.jobs_table, &job_record, transition_fields(&job))
            .await
        {
            if let Some(undo) = undo {
                if !e.is_transient() {
                    self.undo_credit(job.id, undo).await;
                    return Err(e);
                }
                match self.find_job(job.id).await {
                    Ok(Some((_, stored))) if transition.landed_on(&stored) => {
                        debug!(job_id = job.id, "Job write landed despite error");
                        return Ok(stored);
                    }
                    Ok(_) => self.undo_credit(job.id, undo).await,
                    Err(read_err) => warn!(
                        job_id = job.id,
                        error = %read_err,
                        "Job write outcome unknown, credit left marked"
                    ),
                }
            }
            return Err(e);
        }

        debug!(job_id = job.id, status = %job.status, "Committed transition");
        Ok(job)
    }

    async fn append_billing(&self, record: &BillingRecord) -> Result<()> {
        self.insert(&self.billing_table, &BillingFields::from_record(record))
            .await
    }

    async fn list_billing(&self, account_id: &str) -> Result<Vec<BillingRecord>> {
        let formula = format!("{{Account ID}} = {}", formula_literal(account_id));
        let records = self
            .select::<BillingFields>(&self.billing_table, &formula, None)
            .await?;

        let mut billing = records
            .into_iter()
            .map(|record| record.fields.into_record())
            .collect::<Result<Vec<_>>>()?;
        billing.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(billing)
    }

    async fn health_check(&self) -> Result<()> {
        let _ = self
            .select::<Value>(&self.accounts_table, "FALSE()", Some(1))
            .await?;
        Ok(())
    }
}
