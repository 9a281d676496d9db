//! Persistence for accounts, caption jobs and billing history
//!
//! Every backend implements [`RecordStore`] over the canonical records in
//! [`models`]:
//!
//! - `fjall`: embedded LSM key-value store, the default
//! - `memory`: process-local maps for development and tests
//! - `table`: an external spreadsheet-style table service over HTTPS
//!
//! Job status changes go through [`Transition`], a compare-and-set on the
//! current status that carries the usage credit of a completed job, so the
//! status write and the credit land together or not at all.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use boostframe::ledger::{self, Transition};
//!
//! let store = ledger::open(&config)?;
//! let job = store.get_job(42).await?;
//! ```

pub mod embedded;
pub mod error;
pub mod memory;
pub mod models;
pub mod partitions;
pub mod store;
pub mod table;

use std::sync::Arc;

use tracing::info;

pub use embedded::{FjallStore, StoreStats};
pub use error::{LedgerError, Result};
pub use memory::MemoryStore;
pub use models::{
    Account, AccountPatch, Artifacts, BillingPlan, BillingRecord, BillingStatus, Job, JobId,
    JobStatus, NewJob, PlanTier,
};
pub use store::{Credit, RecordStore, Transition};
pub use table::TableStore;

use crate::config::{Config, StoreBackend};

/// Open the record store selected by `store.backend`
pub fn open(config: &Config) -> Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = match config.store.backend {
        StoreBackend::Fjall => Arc::new(FjallStore::open(&config.server.data_path)?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Table => Arc::new(TableStore::from_config(&config.store.table)?),
    };

    info!(backend = store.backend(), "Record store ready");
    Ok(store)
}
