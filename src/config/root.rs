use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use validator::Validate;

use super::LoggingConfig;

/// Errors raised while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// How a put to a list index past the end is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListPutMode {
    /// Fail with `ObjectNotFound`
    #[default]
    Strict,
    /// Pad the list with nulls up to the index
    AutoExtend,
}

/// Batch coordinator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    /// Upper bound on requests sent in one store batch call
    #[serde(default = "default_max_requests_per_call")]
    #[validate(range(min = 1, max = 10000))]
    pub max_requests_per_call: usize,
}

fn default_max_requests_per_call() -> usize {
    5000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_requests_per_call: default_max_requests_per_call(),
        }
    }
}

/// Top-level configuration for a document client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Namespace used when building record keys
    #[validate(length(min = 1))]
    pub namespace: String,

    /// Set name used when building record keys
    #[validate(length(min = 1))]
    pub set_name: String,

    #[serde(default)]
    pub list_put: ListPutMode,

    #[serde(default)]
    #[validate(nested)]
    pub batch: BatchConfig,

    #[serde(default)]
    #[validate(nested)]
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: "test".to_string(),
            set_name: "documents".to_string(),
            list_put: ListPutMode::default(),
            batch: BatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config =
            ClientConfig::from_json_str(r#"{"namespace": "prod", "setName": "profiles"}"#).unwrap();
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.set_name, "profiles");
        assert_eq!(config.list_put, ListPutMode::Strict);
        assert_eq!(config.batch.max_requests_per_call, 5000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "namespace": "prod",
            "setName": "profiles",
            "listPut": "autoExtend",
            "batch": { "maxRequestsPerCall": 100 },
            "logging": { "level": "docpath=debug", "format": "json" }
        }"#;
        let config = ClientConfig::from_json_str(json).unwrap();
        assert_eq!(config.list_put, ListPutMode::AutoExtend);
        assert_eq!(config.batch.max_requests_per_call, 100);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_default_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_namespace() {
        let err = ClientConfig::from_json_str(r#"{"namespace": "", "setName": "s"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_batch_size_out_of_range() {
        for size in [0, 10001] {
            let json = format!(
                r#"{{"namespace": "n", "setName": "s", "batch": {{"maxRequestsPerCall": {}}}}}"#,
                size
            );
            let err = ClientConfig::from_json_str(&json).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "size {}", size);
        }
    }

    #[test]
    fn test_rejects_unknown_list_put_mode() {
        let err = ClientConfig::from_json_str(
            r#"{"namespace": "n", "setName": "s", "listPut": "grow"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
