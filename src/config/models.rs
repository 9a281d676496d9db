use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Directory of the embedded record store
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: ByteSize,
    #[serde(default = "default_max_json_bytes")]
    pub max_json_bytes: ByteSize,
    /// Requests served concurrently before new ones wait
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_path: default_data_path(),
            max_upload_bytes: default_max_upload_bytes(),
            max_json_bytes: default_max_json_bytes(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_max_upload_bytes() -> ByteSize {
    ByteSize(500 * 1024 * 1024) // 500 MB
}

fn default_max_json_bytes() -> ByteSize {
    ByteSize(64 * 1024)
}

fn default_concurrency_limit() -> usize {
    256
}

/// Usage thresholds in minutes
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_free_minutes")]
    pub free_minutes: f64,
    #[serde(default = "default_watermark_minutes")]
    pub watermark_minutes: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free_minutes: default_free_minutes(),
            watermark_minutes: default_watermark_minutes(),
        }
    }
}

fn default_free_minutes() -> f64 {
    crate::metering::FREE_LIMIT
}

fn default_watermark_minutes() -> f64 {
    crate::metering::WATERMARK_LIMIT
}

/// Record store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Fjall,
    Memory,
    Table,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub table: TableStoreConfig,
}

/// External table service connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableStoreConfig {
    #[serde(default = "default_table_base_url")]
    pub base_url: String,
    pub base_id: Option<String>,
    #[serde(default = "default_accounts_table")]
    pub accounts_table: String,
    #[serde(default = "default_jobs_table")]
    pub jobs_table: String,
    #[serde(default = "default_billing_table")]
    pub billing_table: String,
    #[serde(default = "default_table_timeout_secs")]
    pub timeout_secs: u64,
    /// API key (loaded from environment, not from config file)
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for TableStoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_table_base_url(),
            base_id: None,
            accounts_table: default_accounts_table(),
            jobs_table: default_jobs_table(),
            billing_table: default_billing_table(),
            timeout_secs: default_table_timeout_secs(),
            api_key: None,
        }
    }
}

fn default_table_base_url() -> String {
    "https://api.airtable.com".to_string()
}

fn default_accounts_table() -> String {
    "Users".to_string()
}

fn default_jobs_table() -> String {
    "Caption Jobs".to_string()
}

fn default_billing_table() -> String {
    "Billing".to_string()
}

fn default_table_timeout_secs() -> u64 {
    15
}

/// Captioning pipeline endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Submission webhook; submissions are only logged when unset
    pub webhook_url: Option<String>,
    /// Notification webhook for account and job events
    pub notify_url: Option<String>,
    #[serde(default = "default_pipeline_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            notify_url: None,
            timeout_secs: default_pipeline_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_pipeline_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// Payment provider settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentsConfig {
    #[serde(default = "default_payments_api_base")]
    pub api_base: String,
    pub monthly_price_id: Option<String>,
    pub yearly_price_id: Option<String>,
    #[serde(default = "default_payments_timeout_secs")]
    pub timeout_secs: u64,
    /// Secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            api_base: default_payments_api_base(),
            monthly_price_id: None,
            yearly_price_id: None,
            timeout_secs: default_payments_timeout_secs(),
            secret_key: None,
        }
    }
}

fn default_payments_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_payments_timeout_secs() -> u64 {
    20
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Memory,
    #[default]
    Local,
}

/// Uploaded video storage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Root directory for the local provider
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Base URL under which stored objects are reachable by the pipeline
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            root: default_storage_root(),
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/uploads")
}

fn default_public_base_url() -> String {
    "http://localhost:8080/files".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
