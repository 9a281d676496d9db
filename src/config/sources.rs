use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "BOOSTFRAME_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/boostframe.toml";
const ENV_PREFIX: &str = "BOOSTFRAME";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);

    Ok(config)
}

/// Secrets are never stored in TOML files, only in environment
pub(super) fn load_secrets(config: &mut Config) {
    if let Ok(api_key) = env::var("TABLE_API_KEY") {
        config.store.table.api_key = Some(api_key);
    }
    // Name used by older deployments
    if config.store.table.api_key.is_none() {
        if let Ok(api_key) = env::var("AIRTABLE_API_KEY") {
            config.store.table.api_key = Some(api_key);
        }
    }

    if let Ok(secret_key) = env::var("STRIPE_SECRET_KEY") {
        config.payments.secret_key = Some(secret_key);
    }
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // BOOSTFRAME__PIPELINE__WEBHOOK_URL -> pipeline.webhook_url
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::super::models::{LogFormat, StorageProvider, StoreBackend};
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.store.backend, StoreBackend::Fjall);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
max_upload_bytes = "1GB"

[limits]
free_minutes = 3.0
watermark_minutes = 6.0

[store]
backend = "table"

[store.table]
base_id = "appXYZ"
jobs_table = "Jobs"

[pipeline]
webhook_url = "https://hooks.example.com/captions"
max_retries = 5

[storage]
provider = "memory"

[telemetry]
log_format = "json"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.max_upload_bytes.as_u64(), 1024 * 1024 * 1024);
        assert_eq!(config.limits.free_minutes, 3.0);
        assert_eq!(config.store.backend, StoreBackend::Table);
        assert_eq!(config.store.table.base_id.as_deref(), Some("appXYZ"));
        assert_eq!(config.store.table.jobs_table, "Jobs");
        assert_eq!(config.store.table.accounts_table, "Users");
        assert_eq!(config.pipeline.max_retries, 5);
        assert_eq!(config.storage.provider, StorageProvider::Memory);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
    }

    #[test]
    fn test_secret_keys_in_toml_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(
            &config_path,
            r#"
[payments]
secret_key = "sk_from_file"
            "#,
        )
        .unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert!(config.payments.secret_key.is_none());
    }
}
