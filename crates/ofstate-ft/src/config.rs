//! Flow table configuration.

use crate::error::{FtError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] FtError),
}

/// Configuration for a [`FlowTable`](crate::FlowTable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowTableConfig {
    /// Checksum bucket count every logical table starts with.
    pub default_checksum_buckets: u32,
    /// Upper bound accepted by `set_checksum_buckets_size`.
    pub max_checksum_buckets: u32,
    /// Entries an iteration task visits per scheduling turn.
    pub iter_task_batch: usize,
    /// Entries preallocated at creation.
    pub initial_capacity: usize,
    /// Adds beyond this many entries fail with `ResourceExhausted`. `None`
    /// leaves the table unbounded.
    pub max_flows: Option<usize>,
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        Self {
            default_checksum_buckets: 1,
            max_checksum_buckets: 1 << 16,
            iter_task_batch: 64,
            initial_capacity: 0,
            max_flows: None,
        }
    }
}

impl FlowTableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_checksum_buckets(mut self, buckets: u32) -> Self {
        self.default_checksum_buckets = buckets;
        self
    }

    pub fn with_max_checksum_buckets(mut self, buckets: u32) -> Self {
        self.max_checksum_buckets = buckets;
        self
    }

    pub fn with_iter_task_batch(mut self, batch: usize) -> Self {
        self.iter_task_batch = batch;
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_max_flows(mut self, max_flows: Option<usize>) -> Self {
        self.max_flows = max_flows;
        self
    }

    /// Checks a checksum bucket count against this configuration.
    pub fn check_buckets_size(&self, size: u32) -> Result<()> {
        if size == 0 || !size.is_power_of_two() {
            return Err(FtError::InvalidParam(format!(
                "checksum buckets size {} is not a power of two",
                size
            )));
        }
        if size > self.max_checksum_buckets {
            return Err(FtError::InvalidParam(format!(
                "checksum buckets size {} exceeds maximum {}",
                size, self.max_checksum_buckets
            )));
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_checksum_buckets == 0 || !self.max_checksum_buckets.is_power_of_two() {
            return Err(FtError::InvalidParam(format!(
                "max_checksum_buckets {} is not a power of two",
                self.max_checksum_buckets
            )));
        }
        self.check_buckets_size(self.default_checksum_buckets)?;
        if self.iter_task_batch == 0 {
            return Err(FtError::InvalidParam(
                "iter_task_batch must be non-zero".to_string(),
            ));
        }
        if self.max_flows == Some(0) {
            return Err(FtError::InvalidParam("max_flows must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Loads and validates a configuration file. Files ending in `.json` are
    /// parsed as JSON, anything else as YAML.
    pub fn from_path(path: &Path) -> std::result::Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            _ => serde_yaml::from_str(&text)?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = FlowTableConfig::default();
        assert_eq!(config.default_checksum_buckets, 1);
        assert_eq!(config.max_checksum_buckets, 65536);
        assert_eq!(config.iter_task_batch, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_buckets_size_checks() {
        let config = FlowTableConfig::default().with_max_checksum_buckets(16);
        assert!(config.check_buckets_size(1).is_ok());
        assert!(config.check_buckets_size(16).is_ok());
        assert!(matches!(config.check_buckets_size(0), Err(FtError::InvalidParam(_))));
        assert!(matches!(config.check_buckets_size(12), Err(FtError::InvalidParam(_))));
        assert!(matches!(config.check_buckets_size(32), Err(FtError::InvalidParam(_))));
    }

    #[test]
    fn test_invalid_configs() {
        assert!(FlowTableConfig::default().with_iter_task_batch(0).validate().is_err());
        assert!(FlowTableConfig::default().with_max_checksum_buckets(3).validate().is_err());
        assert!(FlowTableConfig::default()
            .with_max_checksum_buckets(4)
            .with_default_checksum_buckets(8)
            .validate()
            .is_err());
        assert!(FlowTableConfig::default().with_max_flows(Some(0)).validate().is_err());
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "default_checksum_buckets: 4\niter_task_batch: 8\nmax_flows: 1000").unwrap();

        let config = FlowTableConfig::from_path(file.path()).unwrap();
        assert_eq!(config.default_checksum_buckets, 4);
        assert_eq!(config.iter_task_batch, 8);
        assert_eq!(config.max_checksum_buckets, 65536);
        assert_eq!(config.max_flows, Some(1000));
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"max_checksum_buckets": 256}}"#).unwrap();

        let config = FlowTableConfig::from_path(file.path()).unwrap();
        assert_eq!(config.max_checksum_buckets, 256);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "default_checksum_buckets: 3").unwrap();

        assert!(matches!(
            FlowTableConfig::from_path(file.path()),
            Err(ConfigError::Invalid(FtError::InvalidParam(_)))
        ));
    }
}
