//! Database access: dialect selection, connection settings and the
//! snapshot-consistent query handle.

mod bind;
mod cockroach;
mod commit;
mod connection;
mod dialect;
mod handle;
mod postgres;
mod registry;

pub use bind::{BindError, PgQuery, bind_all};
pub use cockroach::{CockroachConnector, CockroachDialect};
pub use commit::{CommitStats, DeferredCommitter, PendingCommit};
pub use connection::{APPLICATION_NAME, AdminUser, ServerSettings, Ssl, User};
pub use dialect::{ConnectError, Connector, Dialect, READ_ONLY_TRANSACTION};
pub use handle::{DEFAULT_QUERY_COMMIT_DELAY, Database, QueryError};
pub use postgres::{PostgresConnector, PostgresDialect};
pub use registry::{DialectRegistry, DialectRegistryBuilder, merge_fragments};
