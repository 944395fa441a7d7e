//! PostgreSQL dialect.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::PgPool;

use super::connection::ServerSettings;
use super::dialect::{ConnectError, Connector, Dialect};
use crate::config::ConfigError;

pub const NAME: &str = "postgres";
pub const DEFAULT_PORT: u16 = 5432;
/// Database admin connections use when `Admin.ExistingDatabase` is unset.
pub const ADMIN_FALLBACK_DATABASE: &str = "postgres";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        NAME
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["postgres", "postgresql", "pg"]
    }

    fn decode(&self, fragments: &[JsonValue]) -> Result<Arc<dyn Connector>, ConfigError> {
        let settings = ServerSettings::decode(NAME, fragments)?;
        Ok(Arc::new(PostgresConnector { settings }))
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConnector {
    settings: ServerSettings,
}

impl PostgresConnector {
    pub fn new(settings: ServerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

impl Connector for PostgresConnector {
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
