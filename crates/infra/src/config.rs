//! Configuration loading and representation.
//!
//! The database section of the deployment configuration is a mapping from a
//! dialect name, as written by the operator (`postgres`, `crdb`, ...), to that
//! dialect's settings. Which keys are dialects is decided by the
//! [`DialectRegistry`], not by this module.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::database::{Connector, DEFAULT_QUERY_COMMIT_DELAY, DialectRegistry};

/// Configuration could not be turned into a connector. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no registered dialect matches the configured keys [{configured}] (known dialects: {known})")]
    NoDialect { configured: String, known: String },

    #[error("configuration matches more than one dialect: {0}")]
    AmbiguousDialect(String),

    #[error("invalid {dialect} configuration: {source}")]
    Decode {
        dialect: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration source: {0}")]
    Source(String),
}

/// Raw database configuration, before a dialect has been selected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Delay before read-only query transactions are committed; 0 commits inline.
    #[serde(rename = "QueryCommitDelayMs", default)]
    pub query_commit_delay_ms: Option<u64>,

    /// Every other key is a candidate dialect fragment.
    #[serde(flatten)]
    pub dialects: BTreeMap<String, JsonValue>,
}

impl DatabaseConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Source(format!("malformed JSON: {e}")))
    }

    /// Read the JSON document held by the environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        let raw = std::env::var(var).map_err(|e| ConfigError::Source(format!("{var}: {e}")))?;
        Self::from_json_str(&raw)
    }

    /// Select and decode the configured dialect.
    pub fn resolve(&self, registry: &DialectRegistry) -> Result<ResolvedConfig, ConfigError> {
        let connector = registry.select_by_config(&self.dialects)?;
        let query_commit_delay = self
            .query_commit_delay_ms
            .map_or(DEFAULT_QUERY_COMMIT_DELAY, Duration::from_millis);

        Ok(ResolvedConfig {
            connector,
            query_commit_delay,
        })
    }
}

/// Configuration with its dialect decided; ready to connect.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    connector: Arc<dyn Connector>,
    query_commit_delay: Duration,
}

impl ResolvedConfig {
    pub fn new(connector: Arc<dyn Connector>, query_commit_delay: Duration) -> Self {
        Self {
            connector,
            query_commit_delay,
        }
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn query_commit_delay(&self) -> Duration {
        self.query_commit_delay
    }

    pub fn database_name(&self) -> &str {
        self.connector.database_name()
    }

    pub fn username(&self) -> &str {
        self.connector.username()
    }

    pub fn password(&self) -> &str {
        self.connector.password()
    }

    pub fn dialect_type(&self) -> &'static str {
        self.connector.dialect_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_delay_is_not_treated_as_a_dialect() {
        let config = DatabaseConfig::from_json_str(
            r#"{"QueryCommitDelayMs": 0, "postgres": {"Host": "localhost"}}"#,
        )
        .unwrap();

        assert_eq!(config.query_commit_delay_ms, Some(0));
        assert_eq!(config.dialects.keys().collect::<Vec<_>>(), vec!["postgres"]);
    }

    #[test]
    fn resolves_connector_and_default_delay() {
        let config = DatabaseConfig::from_json_str(
            r#"{"postgres": {"Database": "authplane", "User": {"Username": "app", "Password": "secret"}}}"#,
        )
        .unwrap();

        let resolved = config.resolve(&DialectRegistry::builtin()).unwrap();
        assert_eq!(resolved.dialect_type(), "postgres");
        assert_eq!(resolved.database_name(), "authplane");
        assert_eq!(resolved.username(), "app");
        assert_eq!(resolved.password(), "secret");
        assert_eq!(resolved.query_commit_delay(), DEFAULT_QUERY_COMMIT_DELAY);
    }

    #[test]
    fn explicit_zero_delay_is_kept() {
        let config =
            DatabaseConfig::from_json_str(r#"{"QueryCommitDelayMs": 0, "crdb": {}}"#).unwrap();
        let resolved = config.resolve(&DialectRegistry::builtin()).unwrap();
        assert_eq!(resolved.query_commit_delay(), Duration::ZERO);
        assert_eq!(resolved.dialect_type(), "cockroach");
    }

    #[test]
    fn malformed_source_is_a_config_error() {
        let err = DatabaseConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Source(_)));
    }

    #[test]
    fn missing_env_var_is_a_config_error() {
        let err = DatabaseConfig::from_env("AUTHPLANE_TEST_UNSET_DATABASE_CONFIG").unwrap_err();
        assert!(matches!(err, ConfigError::Source(_)));
    }
}
