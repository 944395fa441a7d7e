//! Drives events through a projection and its executor.
//!
//! Failures are scoped to the event that caused them. Within a batch, a
//! failed event holds back the rest of its own `(instance, aggregate type,
//! aggregate id)` scope,
//! since applying later events would skip over it; other scopes continue.

use std::collections::HashSet;

use authplane_core::{AggregateId, AggregateType, EventType, InstanceId};
use authplane_events::{EventEnvelope, InstanceScoped, Projection, ReduceError};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::executor::{Applied, StatementError, StatementExecutor};

/// Per-event failure, reported to whoever feeds the handler.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("reduce failed: {0}")]
    Reduce(#[from] ReduceError),

    #[error("apply failed: {0}")]
    Statement(#[from] StatementError),
}

impl HandleError {
    /// Whether redelivering the event later may succeed. Reduce failures are
    /// deterministic and never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandleError::Reduce(_) => false,
            HandleError::Statement(e) => e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The projection does not subscribe to the event's aggregate type.
    Ignored,
    Applied(Applied),
}

/// Identifies an event in reports and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPosition {
    pub instance_id: InstanceId,
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub event_type: EventType,
    pub sequence: u64,
}

impl EventPosition {
    pub fn of(event: &EventEnvelope) -> Self {
        Self {
            instance_id: event.instance_id().clone(),
            aggregate_type: event.aggregate_type().clone(),
            aggregate_id: event.aggregate_id().clone(),
            event_type: event.event_type().clone(),
            sequence: event.sequence(),
        }
    }
}

#[derive(Debug)]
pub struct EventFailure {
    pub position: EventPosition,
    pub error: HandleError,
}

/// Outcome of [`ProjectionHandler::process_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub executed: usize,
    /// Already applied earlier (redelivery).
    pub skipped: usize,
    pub ignored: usize,
    pub failures: Vec<EventFailure>,
    /// Not attempted because an earlier event of the same scope failed.
    pub held_back: Vec<EventPosition>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.held_back.is_empty()
    }
}

#[derive(Debug)]
pub struct ProjectionHandler<P, X> {
    projection: P,
    executor: X,
}

impl<P, X> ProjectionHandler<P, X>
where
    P: Projection,
    X: StatementExecutor,
{
    pub fn new(projection: P, executor: X) -> Self {
        Self {
            projection,
            executor,
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    /// Reduce `event` and apply the resulting statement.
    #[instrument(
        skip(self, event),
        fields(
            projection = self.projection.name(),
            instance_id = %event.instance_id(),
            aggregate_id = %event.aggregate_id(),
            event_type = %event.event_type(),
            sequence = event.sequence()
        ),
        err
    )]
    pub async fn process(&self, event: &EventEnvelope) -> Result<Outcome, HandleError> {
        let Some(statement) = self.projection.reduce(event)? else {
            return Ok(Outcome::Ignored);
        };

        let applied = self.executor.apply(&statement).await?;
        if let Applied::Skipped { current_sequence } = applied {
            debug!(current_sequence, "event already projected");
        }
        Ok(Outcome::Applied(applied))
    }

    /// Process `events` in order. Never stops early: a failure only holds
    /// back later events of the same aggregate in the same instance.
    pub async fn process_batch(&self, events: &[EventEnvelope]) -> BatchReport {
        let mut report = BatchReport::default();
        let mut failed_scopes: HashSet<(InstanceId, AggregateType, AggregateId)> = HashSet::new();

        for event in events {
            let scope = event.scope_key();
            if failed_scopes.contains(&scope) {
                report.held_back.push(EventPosition::of(event));
                continue;
            }

            match self.process(event).await {
                Ok(Outcome::Ignored) => report.ignored += 1,
                Ok(Outcome::Applied(Applied::Executed { .. })) => report.executed += 1,
                Ok(Outcome::Applied(Applied::Skipped { .. })) => report.skipped += 1,
                Err(error) => {
                    warn!(
                        projection = self.projection.name(),
                        instance_id = %scope.0,
                        aggregate_type = %scope.1,
                        aggregate_id = %scope.2,
                        sequence = event.sequence(),
                        retryable = error.is_retryable(),
                        error = %error,
                        "projection failed to handle event"
                    );
                    report.failures.push(EventFailure {
                        position: EventPosition::of(event),
                        error,
                    });
                    failed_scopes.insert(scope);
                }
            }
        }

        report
    }

    /// Forget the projection's progress for `instance_id` so it can be
    /// rebuilt from the event log. Rows are left to the caller.
    pub async fn reset(&self, instance_id: &InstanceId) -> Result<u64, HandleError> {
        Ok(self
            .executor
            .reset_sequences(self.projection.name(), instance_id)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authplane_events::{Aggregate, AggregateReducer, EventReducer, Statement, ensure_event};
    use chrono::Utc;
    use serde_json::json;
    use tracing_test::traced_test;

    use crate::executor::InMemoryExecutor;

    const TABLE: &str = "projections.counters";

    fn reduce_bumped(event: &EventEnvelope) -> Result<Statement, ReduceError> {
        ensure_event(event, &[("counter", "counter.bumped"), ("gauge", "gauge.bumped")])?;
        Ok(Statement::insert(
            "counters",
            TABLE,
            event,
            vec![authplane_events::Column::new("id", event.aggregate_id().as_str())],
        ))
    }

    struct Counters {
        reducers: Vec<AggregateReducer>,
    }

    impl Counters {
        fn new() -> Self {
            Self {
                reducers: vec![
                    AggregateReducer::new(
                        "counter",
                        vec![EventReducer::new("counter.bumped", reduce_bumped)],
                    ),
                    AggregateReducer::new(
                        "gauge",
                        vec![EventReducer::new("gauge.bumped", reduce_bumped)],
                    ),
                ],
            }
        }
    }

    impl Projection for Counters {
        fn name(&self) -> &'static str {
            "counters"
        }
        fn table(&self) -> &'static str {
            TABLE
        }
        fn reducers(&self) -> &[AggregateReducer] {
            &self.reducers
        }
    }

    fn bumped(id: &str, sequence: u64, previous: u64) -> EventEnvelope {
        bumped_of("counter", id, sequence, previous)
    }

    fn bumped_of(aggregate_type: &str, id: &str, sequence: u64, previous: u64) -> EventEnvelope {
        EventEnvelope::new(
            Aggregate::new(aggregate_type, id, "instance-id", "ro-id"),
            format!("{aggregate_type}.bumped"),
            sequence,
            previous,
            Utc::now(),
            json!({}),
        )
    }

    #[tokio::test]
    async fn unsubscribed_aggregates_are_ignored() {
        let handler = ProjectionHandler::new(Counters::new(), InMemoryExecutor::new());
        let event = EventEnvelope::new(
            Aggregate::new("user", "u-1", "instance-id", "ro-id"),
            "user.removed",
            1,
            0,
            Utc::now(),
            json!({}),
        );
        assert_eq!(handler.process(&event).await.unwrap(), Outcome::Ignored);
    }

    #[tokio::test]
    async fn redelivery_is_reported_as_skipped() {
        let handler = ProjectionHandler::new(Counters::new(), InMemoryExecutor::new());
        let report = handler
            .process_batch(&[bumped("c-1", 1, 0), bumped("c-1", 1, 0), bumped("c-1", 2, 1)])
            .await;

        assert_eq!(report.executed, 2);
        assert_eq!(report.skipped, 1);
        assert!(report.is_clean());
        assert_eq!(handler.executor().rows(TABLE).unwrap().len(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn failure_holds_back_only_its_own_scope() {
        let executor = InMemoryExecutor::new().with_gap_detection(true);
        let handler = ProjectionHandler::new(Counters::new(), executor);

        let report = handler
            .process_batch(&[
                bumped("c-1", 1, 0),
                bumped("c-1", 3, 2), // sequence 2 never arrived
                bumped("c-2", 1, 0),
                bumped("c-1", 4, 3),
                bumped("c-2", 2, 1),
            ])
            .await;

        assert_eq!(report.executed, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].position.sequence, 3);
        assert!(report.failures[0].error.is_retryable());
        assert_eq!(report.held_back.len(), 1);
        assert_eq!(report.held_back[0].aggregate_id, "c-1");
        assert_eq!(report.held_back[0].sequence, 4);
        assert!(logs_contain("projection failed to handle event"));
    }

    #[tokio::test]
    async fn same_id_under_another_aggregate_type_is_not_held_back() {
        let executor = InMemoryExecutor::new().with_gap_detection(true);
        let handler = ProjectionHandler::new(Counters::new(), executor);

        let report = handler
            .process_batch(&[
                bumped_of("counter", "x", 1, 0),
                bumped_of("counter", "x", 3, 2),
                bumped_of("gauge", "x", 1, 0),
                bumped_of("counter", "x", 4, 3),
            ])
            .await;

        assert_eq!(report.executed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.held_back.len(), 1);
        assert_eq!(report.held_back[0].aggregate_type, "counter");
    }

    #[tokio::test]
    async fn reduce_errors_are_not_retryable() {
        fn broken(event: &EventEnvelope) -> Result<Statement, ReduceError> {
            ensure_event(event, &[("counter", "counter.other")])?;
            unreachable!()
        }

        let mut projection = Counters::new();
        projection.reducers[0].events[0] = EventReducer::new("counter.bumped", broken);
        let handler = ProjectionHandler::new(projection, InMemoryExecutor::new());

        let err = handler.process(&bumped("c-1", 1, 0)).await.unwrap_err();
        assert!(matches!(err, HandleError::Reduce(ReduceError::InvalidEvent { .. })));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn reset_allows_replaying_from_scratch() {
        let handler = ProjectionHandler::new(Counters::new(), InMemoryExecutor::new());
        handler.process(&bumped("c-1", 1, 0)).await.unwrap();

        assert_eq!(handler.reset(&"instance-id".into()).await.unwrap(), 1);
        let replay = handler.process(&bumped("c-1", 1, 0)).await.unwrap();
        assert_eq!(
            replay,
            Outcome::Applied(Applied::Executed { rows_affected: 1 })
        );
    }
}
