//! Infrastructure layer: configuration, database access, statement executors
//! and the concrete projections.

pub mod config;
pub mod database;
pub mod executor;
pub mod projections;


pub use config::{ConfigError, DatabaseConfig, ResolvedConfig};
pub use database::{ConnectError, Database, DialectRegistry, QueryError};
pub use executor::{Applied, InMemoryExecutor, PostgresExecutor, StatementError, StatementExecutor};
pub use projections::{HandleError, IdpUserLinkProjection, Outcome, ProjectionHandler};
