//! PostgreSQL-wire statement executor.
//!
//! Each [`PostgresExecutor::apply`] runs one write transaction:
//! 1. lock the scope's bookkeeping row (`SELECT ... FOR UPDATE`)
//! 2. gate on the recorded sequence (stale statements roll back as skipped)
//! 3. advance `projections.current_sequences`; the upsert only moves forward,
//!    so a concurrent first writer for the same scope is detected here
//! 4. run the rendered mutation
//! 5. commit
//!
//! Any failure rolls the whole transaction back.

use std::sync::Arc;

use async_trait::async_trait;
use authplane_core::InstanceId;
use authplane_events::Statement;
use tracing::{debug, info, instrument};

use super::render::render;
use super::schema::{
    ADVANCE_CURRENT_SEQUENCE, CREATE_CURRENT_SEQUENCES, CREATE_PROJECTIONS_SCHEMA,
    LOCK_CURRENT_SEQUENCE, RESET_SEQUENCES, SELECT_CURRENT_SEQUENCE,
};
use super::{Applied, Gate, SequenceScope, StatementError, StatementExecutor, gate, map_sqlx_error};
use crate::database::{Database, bind_all};

#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    db: Arc<Database>,
    detect_gaps: bool,
}

impl PostgresExecutor {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            detect_gaps: false,
        }
    }

    /// Reject statements whose previous sequence does not match the recorded one.
    pub fn with_gap_detection(mut self, enabled: bool) -> Self {
        self.detect_gaps = enabled;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Create the projections schema, the bookkeeping table and the given
    /// projection tables. Every statement must be idempotent.
    #[instrument(skip(self, projection_tables), fields(tables = projection_tables.len()), err)]
    pub async fn ensure_schema(&self, projection_tables: &[&str]) -> Result<(), StatementError> {
        let ddl = [CREATE_PROJECTIONS_SCHEMA, CREATE_CURRENT_SEQUENCES]
            .into_iter()
            .chain(projection_tables.iter().copied());

        for sql in ddl {
            sqlx::query(sql)
                .execute(self.db.pool())
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        info!("projection schema ready");
        Ok(())
    }
}

#[async_trait]
impl StatementExecutor for PostgresExecutor {
    #[instrument(
        skip(self, statement),
        fields(
            projection = statement.projection,
            instance_id = %statement.instance_id,
            aggregate_id = %statement.aggregate_id,
            sequence = statement.sequence,
            kind = statement.operation.kind()
        ),
        err
    )]
    async fn apply(&self, statement: &Statement) -> Result<Applied, StatementError> {
        let projection = statement.projection;
        let rendered = render(statement)?;
        let mutation = rendered
            .as_ref()
            .map(|r| bind_all(sqlx::query(&r.sql), &r.args))
            .transpose()
            .map_err(|e| StatementError::malformed(projection, e.to_string()))?;
        let sequence = to_bigint(projection, "sequence", statement.sequence)?;
        let previous_sequence =
            to_bigint(projection, "previous sequence", statement.previous_sequence)?;
        let scope = SequenceScope::of(statement);

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let current = sqlx::query_scalar::<_, i64>(LOCK_CURRENT_SEQUENCE)
            .bind(scope.projection)
            .bind(scope.instance_id.as_str())
            .bind(scope.aggregate_type.as_str())
            .bind(scope.aggregate_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_sequence", e))?
            .map(from_bigint);

        if let Gate::Skip { current_sequence } = gate(current, statement, self.detect_gaps)? {
            debug!(current_sequence, "statement already applied, skipping");
            return Ok(Applied::Skipped { current_sequence });
        }

        let advanced = sqlx::query_scalar::<_, i64>(ADVANCE_CURRENT_SEQUENCE)
            .bind(scope.projection)
            .bind(scope.instance_id.as_str())
            .bind(scope.aggregate_type.as_str())
            .bind(scope.aggregate_id.as_str())
            .bind(sequence)
            .bind(previous_sequence)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("advance_sequence", e))?;

        if advanced.is_none() {
            let current_sequence = sqlx::query_scalar::<_, i64>(SELECT_CURRENT_SEQUENCE)
                .bind(scope.projection)
                .bind(scope.instance_id.as_str())
                .bind(scope.aggregate_type.as_str())
                .bind(scope.aggregate_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("read_sequence", e))?
                .map_or(statement.sequence, from_bigint);
            debug!(current_sequence, "concurrent writer advanced the scope, skipping");
            return Ok(Applied::Skipped { current_sequence });
        }

        let rows_affected = match mutation {
            Some(query) => query
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("mutate", e))?
                .rows_affected(),
            None => 0,
        };

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(Applied::Executed { rows_affected })
    }

    async fn current_sequence(&self, scope: &SequenceScope) -> Result<Option<u64>, StatementError> {
        let current = sqlx::query_scalar::<_, i64>(SELECT_CURRENT_SEQUENCE)
            .bind(scope.projection)
            .bind(scope.instance_id.as_str())
            .bind(scope.aggregate_type.as_str())
            .bind(scope.aggregate_id.as_str())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("read_sequence", e))?;
        Ok(current.map(from_bigint))
    }

    #[instrument(skip(self), fields(instance_id = %instance_id), err)]
    async fn reset_sequences(
        &self,
        projection: &'static str,
        instance_id: &InstanceId,
    ) -> Result<u64, StatementError> {
        let result = sqlx::query(RESET_SEQUENCES)
            .bind(projection)
            .bind(instance_id.as_str())
            .execute(self.db.pool())
            .await
            .map_err(|e| map_sqlx_error("reset_sequences", e))?;
        info!(cleared = result.rows_affected(), "projection sequences reset");
        Ok(result.rows_affected())
    }
}

fn to_bigint(projection: &'static str, what: &str, value: u64) -> Result<i64, StatementError> {
    i64::try_from(value)
        .map_err(|_| StatementError::malformed(projection, format!("{what} {value} exceeds BIGINT")))
}

// The CHECK constraint keeps stored sequences non-negative.
fn from_bigint(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_must_fit_bigint() {
        assert_eq!(to_bigint("p", "sequence", 15).unwrap(), 15);
        let err = to_bigint("p", "sequence", u64::MAX).unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(from_bigint(-1), 0);
    }
}
