use std::sync::Arc;

use crate::billing::{BillingService, PaymentProvider};
use crate::config::Config;
use crate::ledger::RecordStore;
use crate::lifecycle::{LifecycleController, RetryPolicy, SubmissionService};
use crate::metering::Limits;
use crate::observability::Metrics;
use crate::pipeline::Dispatcher;
use crate::storage::VideoStorage;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub limits: Limits,
    pub store: Arc<dyn RecordStore>,
    pub storage: VideoStorage,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub submissions: Arc<SubmissionService>,
    pub billing: Arc<BillingService>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        storage: VideoStorage,
        dispatcher: Arc<dyn Dispatcher>,
        payments: Arc<dyn PaymentProvider>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let limits = Limits::from(config.limits);

        let controller = Arc::new(LifecycleController::new(
            store.clone(),
            metrics.clone(),
            RetryPolicy::from(&config.pipeline),
        ));
        let submissions = SubmissionService::new(
            store.clone(),
            controller,
            dispatcher.clone(),
            limits,
            metrics.clone(),
        )
        .with_storage(storage.clone());
        let billing = BillingService::new(store.clone(), payments, config.payments.clone());

        Self {
            config: Arc::new(config),
            limits,
            store,
            storage,
            dispatcher,
            submissions: Arc::new(submissions),
            billing: Arc::new(billing),
            metrics,
        }
    }

    pub fn max_json_bytes(&self) -> u64 {
        self.config.server.max_json_bytes.as_u64()
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.config.server.max_upload_bytes.as_u64()
    }
}
