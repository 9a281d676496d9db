use axum::{
    Router,
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{error, info};

use super::{services, state::AppState};
use crate::config::Config;
use crate::{billing, ledger, pipeline, storage::VideoStorage};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All routes with their middleware
pub fn router(state: AppState) -> Router {
    let concurrency_limit = state.config.server.concurrency_limit;

    Router::new()
        .route("/health", get(services::health))
        .route(
            "/api/account",
            put(services::upsert_account).get(services::get_account),
        )
        .route("/api/usage", get(services::get_usage))
        .route("/api/uploads/{filename}", post(services::upload_video))
        .route(
            "/api/jobs",
            post(services::submit_job).get(services::list_jobs),
        )
        .route("/api/jobs/{job_id}", get(services::get_job))
        .route(
            "/api/webhooks/job-status",
            post(services::job_status_webhook),
        )
        .route("/api/subscriptions", post(services::create_subscription))
        .route("/api/payments/complete", post(services::complete_payment))
        .route("/api/webhooks/payments", post(services::payment_webhook))
        .route("/api/billing", get(services::list_billing))
        .route("/files/{*key}", get(services::serve_file))
        .with_state(state)
        // Bodies are read after decompression, so size limits see decoded bytes
        .layer(RequestDecompressionLayer::new())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}

/// Build every component from configuration and serve until shutdown
pub async fn run(config: Config) -> Result<(), AnyError> {
    config
        .validate()
        .map_err(|e| format!("Invalid configuration: {}", e))?;

    let store =
        ledger::open(&config).map_err(|e| format!("Failed to open record store: {}", e))?;
    let storage = VideoStorage::from_config(&config.storage)
        .map_err(|e| format!("Failed to initialize storage: {}", e))?;
    let dispatcher = pipeline::from_config(&config.pipeline)
        .map_err(|e| format!("Failed to initialize pipeline client: {}", e))?;
    let payments = billing::from_config(&config.payments)
        .map_err(|e| format!("Failed to initialize payments: {}", e))?;

    let address = config.server.bind_addr;
    let state = AppState::new(config, store, storage, dispatcher, payments);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "BoostFrame API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
