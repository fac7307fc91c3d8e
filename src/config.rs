use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::batch::DATA_ARRAY_BATCH_SIZE;
use crate::domain::GeneOrdering;
use crate::error::IngestError;
use crate::model::DEFAULT_MAX_ARRAY_VALUES;
use crate::retry::{
    DEFAULT_BASE_DELAY, DEFAULT_BULK_WRITE_COOLDOWN, DEFAULT_MAX_ATTEMPTS, RetryPolicy,
};
use crate::store::JsonStore;

pub const CONFIG_FILE: &str = "kira-ingest.json";
pub const STORE_ENV: &str = "KIRA_INGEST_STORE";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub bulk_write_cooldown_secs: Option<u64>,
    #[serde(default)]
    pub max_array_values: Option<usize>,
    #[serde(default)]
    pub mtx_gene_order: Option<GeneOrdering>,
    #[serde(default)]
    pub store_root: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub batch_size: usize,
    pub max_array_values: usize,
    pub retry: RetryPolicy,
    pub mtx_gene_order: GeneOrdering,
    pub store_root: Option<Utf8PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            batch_size: DATA_ARRAY_BATCH_SIZE,
            max_array_values: DEFAULT_MAX_ARRAY_VALUES,
            retry: RetryPolicy::default(),
            mtx_gene_order: GeneOrdering::Strict,
            store_root: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, IngestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
        let config: IngestConfig = serde_json::from_str(&content)
            .map_err(|err| IngestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: IngestConfig) -> Result<ResolvedConfig, IngestError> {
        let batch_size = positive("batch_size", config.batch_size, DATA_ARRAY_BATCH_SIZE)?;
        let max_array_values = positive(
            "max_array_values",
            config.max_array_values,
            DEFAULT_MAX_ARRAY_VALUES,
        )?;
        let max_attempts = positive(
            "max_attempts",
            config.max_attempts.map(|value| value as usize),
            DEFAULT_MAX_ATTEMPTS as usize,
        )? as u32;

        let base_delay = config
            .base_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BASE_DELAY);
        let cooldown = config
            .bulk_write_cooldown_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BULK_WRITE_COOLDOWN);

        Ok(ResolvedConfig {
            batch_size,
            max_array_values,
            retry: RetryPolicy::new(max_attempts, base_delay, cooldown),
            mtx_gene_order: config.mtx_gene_order.unwrap_or_default(),
            store_root: config.store_root.map(Utf8PathBuf::from),
        })
    }
}

// Store root precedence: explicit flag, then environment, then config, then
// the per-user data directory.
pub fn resolve_store_root(
    flag: Option<&str>,
    config: &ResolvedConfig,
) -> Result<Utf8PathBuf, IngestError> {
    if let Some(flag) = flag {
        return Ok(Utf8PathBuf::from(flag));
    }
    if let Ok(value) = std::env::var(STORE_ENV) {
        if !value.trim().is_empty() {
            return Ok(Utf8PathBuf::from(value.trim()));
        }
    }
    if let Some(root) = &config.store_root {
        return Ok(root.clone());
    }
    JsonStore::default_root()
}

fn positive(field: &str, value: Option<usize>, default: usize) -> Result<usize, IngestError> {
    match value {
        Some(0) => Err(IngestError::ConfigParse(format!(
            "{field} must be greater than zero"
        ))),
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(IngestConfig::default()).unwrap();
        assert_eq!(resolved.batch_size, 1_000);
        assert_eq!(resolved.max_array_values, 100_000);
        assert_eq!(resolved.retry, RetryPolicy::default());
        assert_eq!(resolved.mtx_gene_order, GeneOrdering::Strict);
    }

    #[test]
    fn explicit_flag_wins_for_store_root() {
        let resolved = ResolvedConfig {
            store_root: Some(Utf8PathBuf::from("/from/config")),
            ..ResolvedConfig::default()
        };
        let root = resolve_store_root(Some("/from/flag"), &resolved).unwrap();
        assert_eq!(root, Utf8PathBuf::from("/from/flag"));
    }
}
