//! Statement executors.
//!
//! An executor applies a [`Statement`] together with the sequence bookkeeping
//! of its scope, atomically. A statement whose sequence is not newer than the
//! recorded one is skipped, which makes at-least-once redelivery safe.

mod error;
mod in_memory;
mod postgres;
mod render;
pub mod schema;

use async_trait::async_trait;
use authplane_core::{AggregateId, AggregateType, InstanceId};
use authplane_events::{InstanceScoped, Statement};

pub use error::{StatementError, is_retryable_sqlstate};
pub use in_memory::{InMemoryExecutor, Row};
pub use postgres::PostgresExecutor;
pub use render::{RenderedStatement, render};

pub(crate) use error::map_sqlx_error;

/// Result of applying one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The mutation ran and the scope's sequence advanced.
    Executed { rows_affected: u64 },
    /// The scope was already at or past the statement's sequence.
    Skipped { current_sequence: u64 },
}

impl Applied {
    pub fn rows_affected(&self) -> u64 {
        match self {
            Applied::Executed { rows_affected } => *rows_affected,
            Applied::Skipped { .. } => 0,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Applied::Skipped { .. })
    }
}

/// Key of one last-applied sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceScope {
    pub projection: &'static str,
    pub instance_id: InstanceId,
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
}

impl SequenceScope {
    pub fn new(
        projection: &'static str,
        instance_id: impl Into<InstanceId>,
        aggregate_type: impl Into<AggregateType>,
        aggregate_id: impl Into<AggregateId>,
    ) -> Self {
        Self {
            projection,
            instance_id: instance_id.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }

    pub fn of(statement: &Statement) -> Self {
        let (instance_id, aggregate_type, aggregate_id) = statement.scope_key();
        Self {
            projection: statement.projection,
            instance_id,
            aggregate_type,
            aggregate_id,
        }
    }
}

/// Applies statements with idempotent sequence gating.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Apply `statement` and record its sequence in one transaction.
    async fn apply(&self, statement: &Statement) -> Result<Applied, StatementError>;

    async fn current_sequence(&self, scope: &SequenceScope) -> Result<Option<u64>, StatementError>;

    /// Forget every recorded sequence of `projection` in `instance_id`
    /// (rebuild support). Returns the number of scopes cleared.
    async fn reset_sequences(
        &self,
        projection: &'static str,
        instance_id: &InstanceId,
    ) -> Result<u64, StatementError>;
}

#[async_trait]
impl<X> StatementExecutor for std::sync::Arc<X>
where
    X: StatementExecutor + ?Sized,
{
    async fn apply(&self, statement: &Statement) -> Result<Applied, StatementError> {
        (**self).apply(statement).await
    }

    async fn current_sequence(&self, scope: &SequenceScope) -> Result<Option<u64>, StatementError> {
        (**self).current_sequence(scope).await
    }

    async fn reset_sequences(
        &self,
        projection: &'static str,
        instance_id: &InstanceId,
    ) -> Result<u64, StatementError> {
        (**self).reset_sequences(projection, instance_id).await
    }
}

/// What to do with a statement given its scope's recorded sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Apply,
    Skip { current_sequence: u64 },
}

/// Sequence gate shared by all executors.
///
/// With `detect_gaps`, the statement's previous sequence must equal the
/// recorded one (0 for a scope never seen), otherwise events were lost
/// upstream and the statement is rejected as retryable.
pub fn gate(
    current: Option<u64>,
    statement: &Statement,
    detect_gaps: bool,
) -> Result<Gate, StatementError> {
    if let Some(current_sequence) = current {
        if statement.sequence <= current_sequence {
            return Ok(Gate::Skip { current_sequence });
        }
    }

    let expected = current.unwrap_or(0);
    if detect_gaps && statement.previous_sequence != expected {
        return Err(StatementError::SequenceGap {
            projection: statement.projection,
            aggregate_type: statement.aggregate_type.clone(),
            aggregate_id: statement.aggregate_id.clone(),
            expected,
            found: statement.previous_sequence,
        });
    }

    Ok(Gate::Apply)
}
