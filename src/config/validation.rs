use crate::config::types::{
    Config, OutputConfig, RetryConfig, SiteConfig, StorageBackend, StorageConfig, SyncConfig,
    TimeoutConfig, UserAgentConfig, WorkerConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site_config(&config.site)?;
    validate_worker_config(&config.workers)?;
    validate_retry_config(&config.retry)?;
    validate_timeout_config(&config.timeouts)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_storage_config(&config.storage)?;
    validate_sync_config(&config.sync)?;
    Ok(())
}

fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    validate_http_url("base-url", &config.base_url)?;

    if config.letters.is_empty() {
        return Err(ConfigError::Validation(
            "letters must name at least one partition".to_string(),
        ));
    }

    for letter in &config.letters {
        if letter.is_empty()
            || !letter
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(ConfigError::Validation(format!(
                "partition key '{}' must be lowercase ASCII letters or digits",
                letter
            )));
        }
    }

    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.count < 1 || config.count > 64 {
        return Err(ConfigError::Validation(format!(
            "workers.count must be between 1 and 64, got {}",
            config.count
        )));
    }

    if config.persist_every < 1 {
        return Err(ConfigError::Validation(
            "workers.persist-every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "retry.max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry.base-delay-ms ({}) cannot exceed retry.max-delay-ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    if config.entry_attempt_ceiling < config.max_attempts {
        return Err(ConfigError::Validation(format!(
            "retry.entry-attempt-ceiling ({}) must be >= retry.max-attempts ({})",
            config.entry_attempt_ceiling, config.max_attempts
        )));
    }

    Ok(())
}

fn validate_timeout_config(config: &TimeoutConfig) -> Result<(), ConfigError> {
    for (name, secs) in [
        ("page-secs", config.page_secs),
        ("download-secs", config.download_secs),
        ("upload-secs", config.upload_secs),
        ("connect-secs", config.connect_secs),
    ] {
        if secs == 0 {
            return Err(ConfigError::Validation(format!(
                "timeouts.{} must be > 0",
                name
            )));
        }
    }
    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if config.crawler_version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crawler-version cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.metadata_dir.is_empty() {
        return Err(ConfigError::Validation(
            "metadata-dir cannot be empty".to_string(),
        ));
    }

    if config.progress_path.is_empty() {
        return Err(ConfigError::Validation(
            "progress-path cannot be empty".to_string(),
        ));
    }

    validate_extension("metadata-ext", &config.metadata_ext)
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    match config.backend {
        StorageBackend::Local => {
            if config.local_dir.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Validation(
                    "storage.local-dir is required for the local backend".to_string(),
                ));
            }
        }
        StorageBackend::ObjectStore => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                ConfigError::Validation(
                    "storage.endpoint is required for the object-store backend".to_string(),
                )
            })?;
            validate_http_url("storage.endpoint", endpoint)?;

            if config.bucket.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Validation(
                    "storage.bucket is required for the object-store backend".to_string(),
                ));
            }
        }
    }

    if config.content_type.is_empty() {
        return Err(ConfigError::Validation(
            "storage.content-type cannot be empty".to_string(),
        ));
    }

    validate_extension("asset-ext", &config.asset_ext)
}

fn validate_sync_config(config: &SyncConfig) -> Result<(), ConfigError> {
    if config.enabled && config.every < 1 {
        return Err(ConfigError::Validation(
            "sync.every must be >= 1 when sync is enabled".to_string(),
        ));
    }
    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}

fn validate_extension(field: &str, ext: &str) -> Result<(), ConfigError> {
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation(format!(
            "{} must be a non-empty alphanumeric extension, got '{}'",
            field, ext
        )));
    }
    Ok(())
}
