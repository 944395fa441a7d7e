//! Binding dialect-neutral [`Value`]s to PostgreSQL-wire queries.

use authplane_events::{Value, ValueKind};
use chrono::{DateTime, Utc};
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use thiserror::Error;

pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// An argument has no lossless PostgreSQL representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("argument ${position} ({value}) does not fit in BIGINT")]
pub struct BindError {
    pub position: usize,
    pub value: u64,
}

/// Bind `args` in order as `$1..$n`.
///
/// Unsigned values are stored as BIGINT, so anything above `i64::MAX` is
/// rejected rather than wrapped. `Null` binds with the parameter type it
/// carries, so Postgres accepts it for non-text columns.
pub fn bind_all<'q>(mut query: PgQuery<'q>, args: &[Value]) -> Result<PgQuery<'q>, BindError> {
    for (index, arg) in args.iter().enumerate() {
        query = match arg {
            Value::Text(s) => query.bind(s.clone()),
            Value::Int(i) => query.bind(*i),
            Value::UInt(u) => query.bind(i64::try_from(*u).map_err(|_| BindError {
                position: index + 1,
                value: *u,
            })?),
            Value::Bool(b) => query.bind(*b),
            Value::Timestamp(ts) => query.bind(*ts),
            Value::Null(ValueKind::Text) => query.bind(None::<String>),
            Value::Null(ValueKind::Int) => query.bind(None::<i64>),
            Value::Null(ValueKind::Bool) => query.bind(None::<bool>),
            Value::Null(ValueKind::Timestamp) => query.bind(None::<DateTime<Utc>>),
        };
    }
    Ok(query)
}
