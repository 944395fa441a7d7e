//! Dialect contracts.
//!
//! A [`Dialect`] recognizes its configuration keys and decodes them into a
//! [`Connector`]. The connector owns the decoded settings and knows how to
//! open a pool for either the application user or the admin user.

use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use thiserror::Error;

use crate::config::ConfigError;

/// Statement that marks the current transaction read-only.
pub const READ_ONLY_TRANSACTION: &str = "SET TRANSACTION READ ONLY";

/// Failure while opening a database handle. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The decoded settings could not be turned into a pool.
    #[error("{dialect}: cannot open connection pool: {message}")]
    Connect { dialect: &'static str, message: String },

    /// The pool was created but the backend did not answer the health check.
    #[error("{dialect}: database connection failed: {source}")]
    PreconditionFailed {
        dialect: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// A supported backend, as seen by configuration selection.
pub trait Dialect: Send + Sync + 'static {
    /// Canonical dialect name (`postgres`, `cockroach`).
    fn name(&self) -> &'static str;

    /// Configuration keys this dialect answers to, lowercase.
    fn aliases(&self) -> &'static [&'static str];

    /// Whether a configuration key belongs to this dialect.
    fn match_name(&self, key: &str) -> bool {
        self.aliases()
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(key.trim()))
    }

    /// Decode every fragment claimed by this dialect into a connector.
    ///
    /// Fragments are merged in order, later keys overriding earlier ones.
    fn decode(&self, fragments: &[JsonValue]) -> Result<Arc<dyn Connector>, ConfigError>;
}

/// Decoded connection settings for one backend.
pub trait Connector: Debug + Send + Sync + 'static {
    /// Build a pool with application (`false`) or admin (`true`) credentials.
    ///
    /// The pool is lazy: no connection is made until first use, which is
    /// what lets the caller's ping classify an unreachable backend.
    fn connect(&self, use_admin: bool) -> Result<PgPool, ConnectError>;

    fn database_name(&self) -> &str;

    fn username(&self) -> &str;

    fn password(&self) -> &str;

    /// Canonical name of the dialect this connector was decoded by.
    fn dialect_type(&self) -> &'static str;

    /// SQL issued at the start of each read transaction.
    fn read_only_statement(&self) -> &'static str {
        READ_ONLY_TRANSACTION
    }
}
