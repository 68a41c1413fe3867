use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Environment variable overriding `worker_count`.
pub const WORKERS_ENV: &str = "SETTLR_WORKERS";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Applies `SETTLR_WORKERS` when it holds a positive integer; anything else
/// is ignored.
pub fn apply_env_overrides(config: Config) -> Config {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

fn apply_overrides_from<F>(mut config: Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(WORKERS_ENV) {
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => config.worker_count = n,
            _ => log::warn!("Ignoring invalid {}={:?}", WORKERS_ENV, raw),
        }
    }
    config
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let positive = [
        ("worker_count", config.worker_count as u64),
        ("queue_capacity", config.queue_capacity as u64),
        ("page_size", config.page_size),
        ("watch_interval_ms", config.watch_interval_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than 0", field),
            });
        }
    }

    if config.export_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "export_directory must not be empty".to_string(),
        });
    }

    Ok(())
}
