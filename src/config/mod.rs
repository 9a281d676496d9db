//! Configuration management for BoostFrame
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use boostframe::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `BOOSTFRAME__<section>__<key>`
//!
//! Examples:
//! - `BOOSTFRAME__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `BOOSTFRAME__STORE__BACKEND=table`
//! - `BOOSTFRAME__PIPELINE__WEBHOOK_URL=https://hook.example.com/abc`
//!
//! Secrets are read from `TABLE_API_KEY` and `STRIPE_SECRET_KEY` only.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/boostframe.toml`.
//! This can be overridden using the `BOOSTFRAME_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    Config, LimitsConfig, LogFormat, PaymentsConfig, PipelineConfig, ServerConfig,
    StorageConfig, StorageProvider, StoreBackend, StoreConfig, TableStoreConfig,
    TelemetryConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation
    /// fails (limit ordering, incomplete table backend, bad URLs).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, plus environment overrides
    /// and secrets.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let mut config = sources::load_from_sources(path)?;
        sources::load_secrets(&mut config);
        validation::validate(&config)?;
        Ok(config)
    }

    /// Check an already assembled configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(
            &config_path,
            r#"
[store]
backend = "memory"
            "#,
        )
        .unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.limits.watermark_minutes, 10.0);
    }

    #[test]
    fn test_validation_catches_bad_limits() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(
            &config_path,
            r#"
[limits]
free_minutes = 20.0
watermark_minutes = 10.0
            "#,
        )
        .unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::InvalidLimits { .. })
        ));
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
data_path = "data/ledger"
max_upload_bytes = "200MB"
concurrency_limit = 64

[limits]
free_minutes = 5.0
watermark_minutes = 10.0

[store]
backend = "fjall"

[pipeline]
webhook_url = "https://hook.eu1.make.com/abc"
notify_url = "https://hook.eu1.make.com/events"
timeout_secs = 20
max_retries = 2
retry_backoff_ms = 250

[payments]
monthly_price_id = "price_monthly"
yearly_price_id = "price_yearly"

[storage]
provider = "local"
root = "data/uploads"
public_base_url = "https://files.example.com"

[telemetry]
log_level = "boostframe=debug,info"
log_format = "text"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();

        assert_eq!(config.server.concurrency_limit, 64);
        assert_eq!(config.server.max_upload_bytes.as_u64(), 200 * 1024 * 1024);
        assert_eq!(config.pipeline.max_retries, 2);
        assert_eq!(
            config.payments.yearly_price_id.as_deref(),
            Some("price_yearly")
        );
        assert_eq!(config.storage.public_base_url, "https://files.example.com");
        assert_eq!(config.telemetry.log_level, "boostframe=debug,info");
    }
}
