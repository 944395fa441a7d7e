//! The database handle: a pool plus its connector metadata and the
//! read-transaction commit policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use authplane_events::Value;
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::bind::{BindError, bind_all};
use super::commit::{CommitStats, DeferredCommitter};
use super::dialect::{ConnectError, Connector};
use crate::config::ResolvedConfig;

/// How long read transactions stay open after the rows were fetched.
pub const DEFAULT_QUERY_COMMIT_DELAY: Duration = Duration::from_millis(10);

/// Failure on the read path.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("cannot open read-only transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Fetch(#[source] sqlx::Error),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

/// Shared database handle.
///
/// Every query runs in its own read-only transaction. With a non-zero commit
/// delay the transaction is handed to a [`DeferredCommitter`] after the rows
/// were fetched, so the caller never waits for the commit.
#[derive(Debug)]
pub struct Database {
    pool: PgPool,
    connector: Arc<dyn Connector>,
    query_commit_delay_us: AtomicU64,
    committer: DeferredCommitter,
}

impl Database {
    /// Open the pool described by `config` and check that the backend answers.
    #[instrument(
        skip(config),
        fields(dialect = config.dialect_type(), database = config.database_name()),
        err
    )]
    pub async fn connect(config: &ResolvedConfig, use_admin: bool) -> Result<Self, ConnectError> {
        let connector = Arc::clone(config.connector());
        let pool = connector.connect(use_admin)?;

        if let Err(source) = ping_pool(&pool).await {
            pool.close().await;
            return Err(ConnectError::PreconditionFailed {
                dialect: connector.dialect_type(),
                source,
            });
        }

        info!(user = connector.username(), "database connection established");
        Ok(Self::from_pool(pool, connector, config.query_commit_delay()))
    }

    /// Wrap an existing pool. Must be called inside a Tokio runtime.
    pub fn from_pool(pool: PgPool, connector: Arc<dyn Connector>, query_commit_delay: Duration) -> Self {
        Self {
            pool,
            connector,
            query_commit_delay_us: AtomicU64::new(as_micros(query_commit_delay)),
            committer: DeferredCommitter::new(),
        }
    }

    pub fn with_query_commit_delay(self, delay: Duration) -> Self {
        self.set_query_commit_delay(delay);
        self
    }

    pub fn set_query_commit_delay(&self, delay: Duration) {
        self.query_commit_delay_us
            .store(as_micros(delay), Ordering::Relaxed);
    }

    pub fn query_commit_delay(&self) -> Duration {
        Duration::from_micros(self.query_commit_delay_us.load(Ordering::Relaxed))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn dialect_type(&self) -> &'static str {
        self.connector.dialect_type()
    }

    pub fn database_name(&self) -> &str {
        self.connector.database_name()
    }

    pub fn username(&self) -> &str {
        self.connector.username()
    }

    pub fn commit_stats(&self) -> &CommitStats {
        self.committer.stats()
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        ping_pool(&self.pool).await
    }

    /// Run `sql` in a fresh read-only transaction and return all rows.
    #[instrument(level = "debug", skip(self, args), fields(arg_count = args.len()), err)]
    pub async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<PgRow>, QueryError> {
        let query = bind_all(sqlx::query(sql), args)?;
        let mut tx = self.begin_read_only().await.map_err(QueryError::Begin)?;

        let rows = query.fetch_all(&mut *tx).await;
        self.release(tx).await;
        rows.map_err(QueryError::Fetch)
    }

    /// Like [`Self::query`] but for at most one row.
    ///
    /// If the read-only transaction cannot be opened the query still runs,
    /// directly on the pool.
    #[instrument(level = "debug", skip(self, args), fields(arg_count = args.len()), err)]
    pub async fn query_row(&self, sql: &str, args: &[Value]) -> Result<Option<PgRow>, QueryError> {
        let query = bind_all(sqlx::query(sql), args)?;

        match self.begin_read_only().await {
            Ok(mut tx) => {
                let row = query.fetch_optional(&mut *tx).await;
                self.release(tx).await;
                row.map_err(QueryError::Fetch)
            }
            Err(e) => {
                debug!(error = %e, "read-only transaction unavailable, querying pool directly");
                query
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(QueryError::Fetch)
            }
        }
    }

    /// [`Self::query`] bounded by `timeout`. A commit that was already handed
    /// to the committer still happens when the caller gives up.
    pub async fn query_with_timeout(
        &self,
        timeout: Duration,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<PgRow>, QueryError> {
        tokio::time::timeout(timeout, self.query(sql, args))
            .await
            .map_err(|_| QueryError::Timeout(timeout))?
    }

    pub async fn query_row_with_timeout(
        &self,
        timeout: Duration,
        sql: &str,
        args: &[Value],
    ) -> Result<Option<PgRow>, QueryError> {
        tokio::time::timeout(timeout, self.query_row(sql, args))
            .await
            .map_err(|_| QueryError::Timeout(timeout))?
    }

    /// Wait for all deferred commits scheduled so far.
    pub async fn flush(&self) {
        self.committer.flush().await;
    }

    /// Drain pending commits, then close the pool.
    pub async fn close(&self) {
        self.committer.shutdown().await;
        self.pool.close().await;
        info!(dialect = self.dialect_type(), "database handle closed");
    }

    async fn begin_read_only(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(self.connector.read_only_statement())
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn release(&self, tx: Transaction<'static, Postgres>) {
        self.committer
            .schedule(Box::new(tx), self.query_commit_delay())
            .await;
    }
}

async fn ping_pool(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    conn.ping().await
}

fn as_micros(delay: Duration) -> u64 {
    u64::try_from(delay.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::DialectRegistry;

    fn unreachable_config() -> ResolvedConfig {
        DatabaseConfig::from_json_str(
            r#"{"postgres": {"Host": "authplane-db.invalid", "Database": "authplane"}}"#,
        )
        .unwrap()
        .resolve(&DialectRegistry::builtin())
        .unwrap()
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_precondition_failure() {
        let err = Database::connect(&unreachable_config(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectError::PreconditionFailed {
                dialect: "postgres",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn handle_exposes_connector_metadata_and_delay() {
        let config = unreachable_config();
        let pool = config.connector().connect(false).unwrap();
        let db = Database::from_pool(pool, Arc::clone(config.connector()), config.query_commit_delay());

        assert_eq!(db.dialect_type(), "postgres");
        assert_eq!(db.database_name(), "authplane");
        assert_eq!(db.query_commit_delay(), DEFAULT_QUERY_COMMIT_DELAY);

        db.set_query_commit_delay(Duration::ZERO);
        assert_eq!(db.query_commit_delay(), Duration::ZERO);

        let db = db.with_query_commit_delay(Duration::from_millis(250));
        assert_eq!(db.query_commit_delay(), Duration::from_millis(250));
        assert_eq!(db.commit_stats().scheduled(), 0);
    }

    #[tokio::test]
    async fn bind_errors_surface_before_touching_the_pool() {
        let config = unreachable_config();
        let pool = config.connector().connect(false).unwrap();
        let db = Database::from_pool(pool, Arc::clone(config.connector()), Duration::ZERO);

        let err = db
            .query("SELECT $1", &[Value::UInt(u64::MAX)])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Bind(_)));
    }
}
