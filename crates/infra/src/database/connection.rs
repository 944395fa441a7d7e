//! Connection settings shared by the PostgreSQL-wire dialects.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use tracing::debug;

use super::dialect::ConnectError;
use super::registry::merge_fragments;
use crate::config::ConfigError;

/// `application_name` reported to the backend.
pub const APPLICATION_NAME: &str = "authplane";

const DEFAULT_MAX_OPEN_CONNS: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Ssl {
    /// libpq-style mode: `disable`, `require`, `verify-full`, ...
    pub mode: Option<String>,
    pub root_cert: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
}

#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct User {
    pub username: String,
    pub password: String,
    #[serde(rename = "SSL")]
    pub ssl: Ssl,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl", &self.ssl)
            .finish()
    }
}

/// Credentials used for schema setup. May point at a different database than
/// the application one, since the application database may not exist yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AdminUser {
    pub existing_database: Option<String>,
    #[serde(flatten)]
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub max_open_conns: u32,
    /// Accepted for compatibility; sqlx pools have no idle ceiling.
    pub max_idle_conns: u32,
    /// Seconds; 0 keeps connections forever.
    pub max_conn_lifetime: u64,
    /// Seconds; 0 keeps idle connections forever.
    pub max_conn_idle_time: u64,
    /// Runtime parameters sent as `options` on connect.
    pub options: BTreeMap<String, String>,
    pub user: User,
    pub admin: AdminUser,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            database: String::new(),
            max_open_conns: 0,
            max_idle_conns: 0,
            max_conn_lifetime: 0,
            max_conn_idle_time: 0,
            options: BTreeMap::new(),
            user: User::default(),
            admin: AdminUser::default(),
        }
    }
}

impl ServerSettings {
    /// Merge and decode the fragments claimed by `dialect`.
    pub fn decode(dialect: &'static str, fragments: &[JsonValue]) -> Result<Self, ConfigError> {
        serde_json::from_value(merge_fragments(fragments))
            .map_err(|source| ConfigError::Decode { dialect, source })
    }

    /// Lazily connected pool; see [`super::Connector::connect`].
    pub fn open_pool(
        &self,
        dialect: &'static str,
        use_admin: bool,
        default_port: u16,
        admin_fallback_db: &str,
    ) -> Result<PgPool, ConnectError> {
        let options = self.connect_options(dialect, use_admin, default_port, admin_fallback_db)?;
        Ok(self.pool_options().connect_lazy_with(options))
    }

    pub fn credentials(&self, use_admin: bool) -> &User {
        if use_admin { &self.admin.user } else { &self.user }
    }

    /// Database to connect to; admin connections use `ExistingDatabase`, or
    /// `admin_fallback_db` when it is unset.
    pub fn target_database<'a>(&'a self, use_admin: bool, admin_fallback_db: &'a str) -> &'a str {
        if !use_admin {
            return &self.database;
        }
        match self.admin.existing_database.as_deref() {
            Some(db) if !db.trim().is_empty() => db,
            _ => admin_fallback_db,
        }
    }

    pub fn connect_options(
        &self,
        dialect: &'static str,
        use_admin: bool,
        default_port: u16,
        admin_fallback_db: &str,
    ) -> Result<PgConnectOptions, ConnectError> {
        let user = self.credentials(use_admin);

        let ssl_mode = match user.ssl.mode.as_deref() {
            None | Some("") => PgSslMode::Disable,
            Some(mode) => PgSslMode::from_str(mode).map_err(|e| ConnectError::Connect {
                dialect,
                message: format!("invalid SSL mode {mode:?}: {e}"),
            })?,
        };

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port.unwrap_or(default_port))
            .database(self.target_database(use_admin, admin_fallback_db))
            .username(&user.username)
            .application_name(APPLICATION_NAME)
            .ssl_mode(ssl_mode);

        if !user.password.is_empty() {
            options = options.password(&user.password);
        }
        if let Some(root_cert) = user.ssl.root_cert.as_deref().filter(|p| !p.is_empty()) {
            options = options.ssl_root_cert(root_cert);
        }
        if let Some(cert) = user.ssl.cert.as_deref().filter(|p| !p.is_empty()) {
            options = options.ssl_client_cert(cert);
        }
        if let Some(key) = user.ssl.key.as_deref().filter(|p| !p.is_empty()) {
            options = options.ssl_client_key(key);
        }
        if !self.options.is_empty() {
            options = options.options(self.options.iter());
        }

        Ok(options)
    }

    /// Pool limits. `MaxIdleConns` is not applied: sqlx can only hold a floor
    /// of open connections, not cap idle ones.
    pub fn pool_options(&self) -> PgPoolOptions {
        let max = if self.max_open_conns == 0 {
            DEFAULT_MAX_OPEN_CONNS
        } else {
            self.max_open_conns
        };
        if self.max_idle_conns > 0 {
            debug!(
                max_idle_conns = self.max_idle_conns,
                "MaxIdleConns has no pool equivalent, idle connections expire by MaxConnIdleTime"
            );
        }

        PgPoolOptions::new()
            .max_connections(max)
            .max_lifetime(seconds(self.max_conn_lifetime))
            .idle_timeout(seconds(self.max_conn_idle_time))
    }
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: serde_json::Value) -> ServerSettings {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn decodes_pascal_case_settings() {
        let s = settings(json!({
            "Host": "db.internal",
            "Port": 6432,
            "Database": "authplane",
            "MaxOpenConns": 20,
            "MaxConnLifetime": 1800,
            "Options": {"search_path": "projections"},
            "User": {"Username": "app", "Password": "pw", "SSL": {"Mode": "require"}},
            "Admin": {"ExistingDatabase": "postgres", "Username": "root"}
        }));

        assert_eq!(s.host, "db.internal");
        assert_eq!(s.port, Some(6432));
        assert_eq!(s.max_open_conns, 20);
        assert_eq!(s.user.ssl.mode.as_deref(), Some("require"));
        assert_eq!(s.admin.user.username, "root");
        assert_eq!(s.admin.existing_database.as_deref(), Some("postgres"));
        assert_eq!(s.options["search_path"], "projections");
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let s = settings(json!({}));
        assert_eq!(s, ServerSettings::default());
        assert_eq!(s.host, "localhost");
    }

    #[test]
    fn application_credentials_target_the_application_database() {
        let s = settings(json!({
            "Database": "authplane",
            "User": {"Username": "app"},
            "Admin": {"Username": "root"}
        }));
        let opts = s.connect_options("postgres", false, 5432, "postgres").unwrap();

        assert_eq!(opts.get_host(), "localhost");
        assert_eq!(opts.get_port(), 5432);
        assert_eq!(opts.get_username(), "app");
        assert_eq!(opts.get_database(), Some("authplane"));
    }

    #[test]
    fn admin_credentials_use_the_existing_database_or_fallback() {
        let mut s = settings(json!({"Database": "authplane", "Admin": {"Username": "root"}}));
        let opts = s.connect_options("postgres", true, 5432, "postgres").unwrap();
        assert_eq!(opts.get_username(), "root");
        assert_eq!(opts.get_database(), Some("postgres"));

        s.admin.existing_database = Some("maintenance".into());
        let opts = s.connect_options("postgres", true, 5432, "postgres").unwrap();
        assert_eq!(opts.get_database(), Some("maintenance"));
    }

    #[test]
    fn max_idle_conns_does_not_open_connections_eagerly() {
        let s = settings(json!({"MaxOpenConns": 20, "MaxIdleConns": 5, "MaxConnIdleTime": 60}));
        let pool = s.pool_options();

        assert_eq!(pool.get_max_connections(), 20);
        assert_eq!(pool.get_min_connections(), 0);
        assert_eq!(pool.get_idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn invalid_ssl_mode_is_a_connect_error() {
        let s = settings(json!({"User": {"SSL": {"Mode": "sometimes"}}}));
        let err = s.connect_options("postgres", false, 5432, "postgres").unwrap_err();
        assert!(matches!(err, ConnectError::Connect { dialect: "postgres", .. }));
    }

    #[test]
    fn decode_reports_the_dialect_on_bad_types() {
        let err = ServerSettings::decode("cockroach", &[json!({"Port": "not a port"})]).unwrap_err();
        assert!(matches!(err, ConfigError::Decode { dialect: "cockroach", .. }));
    }

    #[test]
    fn debug_output_hides_passwords() {
        let s = settings(json!({"User": {"Username": "app", "Password": "hunter2"}}));
        let rendered = format!("{s:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
