use super::models::{Config, StoreBackend};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Usage limits must satisfy 0 <= free ({free}) <= watermark ({watermark})")]
    InvalidLimits { free: f64, watermark: f64 },

    #[error("Table store backend requires '{field}'")]
    MissingTableSetting { field: &'static str },

    #[error("Invalid URL for {field}: '{value}' (expected http:// or https://)")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("pipeline.max_retries ({actual}) exceeds limit of {limit}")]
    TooManyRetries { actual: u32, limit: u32 },
}

const MAX_PIPELINE_RETRIES: u32 = 10;

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_limits(config)?;
    validate_store(config)?;
    validate_pipeline(config)?;
    validate_payments(config)?;
    validate_server(config)?;
    validate_url("storage.public_base_url", &config.storage.public_base_url)?;
    Ok(())
}

fn validate_limits(config: &Config) -> Result<(), ValidationError> {
    let free = config.limits.free_minutes;
    let watermark = config.limits.watermark_minutes;

    if !free.is_finite() || !watermark.is_finite() || free < 0.0 || free > watermark {
        return Err(ValidationError::InvalidLimits { free, watermark });
    }

    Ok(())
}

/// The table backend needs a base id and an API key to be usable
fn validate_store(config: &Config) -> Result<(), ValidationError> {
    if config.store.backend != StoreBackend::Table {
        return Ok(());
    }

    let table = &config.store.table;
    validate_url("store.table.base_url", &table.base_url)?;

    if table.base_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
        return Err(ValidationError::MissingTableSetting {
            field: "store.table.base_id",
        });
    }
    if table.api_key.is_none() {
        return Err(ValidationError::MissingTableSetting {
            field: "TABLE_API_KEY",
        });
    }
    if table.timeout_secs == 0 {
        return Err(ValidationError::NonPositive {
            field: "store.table.timeout_secs",
        });
    }

    Ok(())
}

fn validate_pipeline(config: &Config) -> Result<(), ValidationError> {
    let pipeline = &config.pipeline;

    if let Some(url) = &pipeline.webhook_url {
        validate_url("pipeline.webhook_url", url)?;
    }
    if let Some(url) = &pipeline.notify_url {
        validate_url("pipeline.notify_url", url)?;
    }
    if pipeline.timeout_secs == 0 {
        return Err(ValidationError::NonPositive {
            field: "pipeline.timeout_secs",
        });
    }
    if pipeline.max_retries > MAX_PIPELINE_RETRIES {
        return Err(ValidationError::TooManyRetries {
            actual: pipeline.max_retries,
            limit: MAX_PIPELINE_RETRIES,
        });
    }

    Ok(())
}

fn validate_payments(config: &Config) -> Result<(), ValidationError> {
    validate_url("payments.api_base", &config.payments.api_base)?;
    if config.payments.timeout_secs == 0 {
        return Err(ValidationError::NonPositive {
            field: "payments.timeout_secs",
        });
    }
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_upload_bytes.as_u64() == 0 {
        return Err(ValidationError::NonPositive {
            field: "server.max_upload_bytes",
        });
    }
    if config.server.max_json_bytes.as_u64() == 0 {
        return Err(ValidationError::NonPositive {
            field: "server.max_json_bytes",
        });
    }
    if config.server.concurrency_limit == 0 {
        return Err(ValidationError::NonPositive {
            field: "server.concurrency_limit",
        });
    }
    Ok(())
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let has_host = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .is_some_and(|rest| !rest.is_empty());

    if !has_host {
        return Err(ValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;

    fn table_config() -> Config {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Table;
        config.store.table.base_id = Some("appXYZ".to_string());
        config.store.table.api_key = Some("key".to_string());
        config
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_limits_ordering() {
        let mut config = Config::default();
        config.limits.free_minutes = 12.0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidLimits { .. })
        ));
    }

    #[test]
    fn test_negative_limit_rejected() {
        let mut config = Config::default();
        config.limits.free_minutes = -1.0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidLimits { .. })
        ));
    }

    #[test]
    fn test_table_backend_complete() {
        assert!(validate(&table_config()).is_ok());
    }

    #[test]
    fn test_table_backend_missing_base_id() {
        let mut config = table_config();
        config.store.table.base_id = None;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::MissingTableSetting {
                field: "store.table.base_id"
            })
        ));
    }

    #[test]
    fn test_table_backend_missing_key() {
        let mut config = table_config();
        config.store.table.api_key = None;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::MissingTableSetting {
                field: "TABLE_API_KEY"
            })
        ));
    }

    #[test]
    fn test_invalid_webhook_url() {
        let mut config = Config::default();
        config.pipeline.webhook_url = Some("hooks.example.com/abc".to_string());

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidUrl {
                field: "pipeline.webhook_url",
                ..
            })
        ));
    }

    #[test]
    fn test_retry_cap() {
        let mut config = Config::default();
        config.pipeline.max_retries = 50;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::TooManyRetries { actual: 50, .. })
        ));
    }

    #[test]
    fn test_zero_upload_limit() {
        let mut config = Config::default();
        config.server.max_upload_bytes = ByteSize(0);

        assert!(matches!(
            validate(&config),
            Err(ValidationError::NonPositive { .. })
        ));
    }
}
