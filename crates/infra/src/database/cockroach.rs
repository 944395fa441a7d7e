//! CockroachDB dialect. CockroachDB speaks the PostgreSQL wire protocol.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::PgPool;

use super::connection::ServerSettings;
use super::dialect::{ConnectError, Connector, Dialect};
use crate::config::ConfigError;

pub const NAME: &str = "cockroach";
pub const DEFAULT_PORT: u16 = 26257;
/// Database admin connections use when `Admin.ExistingDatabase` is unset.
pub const ADMIN_FALLBACK_DATABASE: &str = "defaultdb";

#[derive(Debug, Clone, Copy, Default)]
pub struct CockroachDialect;

impl Dialect for CockroachDialect {
    fn name(&self) -> &'static str {
        NAME
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["cockroach", "cockroachdb", "crdb"]
    }

    fn decode(&self, fragments: &[JsonValue]) -> Result<Arc<dyn Connector>, ConfigError> {
        let settings = ServerSettings::decode(NAME, fragments)?;
        Ok(Arc::new(CockroachConnector { settings }))
    }
}

#[derive(Debug, Clone)]
pub struct CockroachConnector {
    settings: ServerSettings,
}

impl CockroachConnector {
    pub fn new(settings: ServerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

impl Connector for CockroachConnector {
    fn connect(&self, use_admin: bool) -> Result<PgPool, ConnectError> {
        self.settings
            .open_pool(NAME, use_admin, DEFAULT_PORT, ADMIN_FALLBACK_DATABASE)
    }

    fn database_name(&self) -> &str {
        &self.settings.database
    }

    fn username(&self) -> &str {
        &self.settings.user.username
    }

    fn password(&self) -> &str {
        &self.settings.user.password
    }

    fn dialect_type(&self) -> &'static str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognizes_cockroach_keys_only() {
        for key in ["cockroach", "CockroachDB", "crdb"] {
            assert!(CockroachDialect.match_name(key), "{key}");
        }
        for key in ["postgres", "pg", "cockroach2"] {
            assert!(!CockroachDialect.match_name(key), "{key}");
        }
    }

    #[test]
    fn merged_fragments_decode_into_one_connector() {
        let connector = CockroachDialect
            .decode(&[
                json!({"Database": "zitadel", "User": {"Username": "zitadel"}}),
                json!({"User": {"Password": "from-secret-store"}}),
            ])
            .unwrap();

        assert_eq!(connector.dialect_type(), "cockroach");
        assert_eq!(connector.database_name(), "zitadel");
        assert_eq!(connector.username(), "zitadel");
        assert_eq!(connector.password(), "from-secret-store");
    }

    #[test]
    fn admin_connections_default_to_defaultdb_on_26257() {
        let settings: ServerSettings =
            serde_json::from_value(json!({"Database": "zitadel", "Admin": {"Username": "root"}}))
                .unwrap();
        let opts = settings
            .connect_options(NAME, true, DEFAULT_PORT, ADMIN_FALLBACK_DATABASE)
            .unwrap();

        assert_eq!(opts.get_port(), 26257);
        assert_eq!(opts.get_database(), Some("defaultdb"));
        assert_eq!(opts.get_username(), "root");
    }
}
