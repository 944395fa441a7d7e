use thiserror::Error;

use authplane_core::{AggregateType, EventType};

use crate::{EventEnvelope, Statement};

/// A pure reduce function: one event in, one statement out.
pub type ReduceFn = fn(&EventEnvelope) -> Result<Statement, ReduceError>;

/// Reducing an event failed. No statement is produced.
#[derive(Debug, Error)]
pub enum ReduceError {
    /// The reducer was handed an event it does not handle. This signals a
    /// broken dispatch table and is an InvalidArgument-class failure.
    #[error("invalid event {aggregate_type}/{event_type}: reducer expects one of [{expected}]")]
    InvalidEvent {
        expected: String,
        aggregate_type: AggregateType,
        event_type: EventType,
    },

    /// The payload does not decode into the body of its event type.
    #[error("payload of {event_type} could not be decoded: {source}")]
    Payload {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },

    /// A reducer produced a statement for a table its projection does not own.
    #[error("projection {projection} owns table {expected}, statement targets {found}")]
    ForeignTable {
        projection: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

impl ReduceError {
    pub fn payload(event: &EventEnvelope, source: serde_json::Error) -> Self {
        Self::Payload {
            event_type: event.event_type().clone(),
            source,
        }
    }
}

/// Guard at the top of every reducer.
///
/// Succeeds when `(aggregate type, event type)` of `event` is one of `accepted`.
/// Reducers call this themselves instead of trusting the dispatch table, so
/// each reducer can be exercised directly with a mismatched event.
pub fn ensure_event(
    event: &EventEnvelope,
    accepted: &[(&'static str, &'static str)],
) -> Result<(), ReduceError> {
    let matches = accepted.iter().any(|(aggregate_type, event_type)| {
        event.aggregate_type() == aggregate_type && event.event_type() == event_type
    });
    if matches {
        return Ok(());
    }

    let expected = accepted
        .iter()
        .map(|(aggregate_type, event_type)| format!("{aggregate_type}/{event_type}"))
        .collect::<Vec<_>>()
        .join(", ");

    Err(ReduceError::InvalidEvent {
        expected,
        aggregate_type: event.aggregate_type().clone(),
        event_type: event.event_type().clone(),
    })
}

/// Maps one event type of an aggregate to its reduce function.
#[derive(Debug, Clone, Copy)]
pub struct EventReducer {
    pub event_type: &'static str,
    pub reduce: ReduceFn,
}

impl EventReducer {
    pub const fn new(event_type: &'static str, reduce: ReduceFn) -> Self {
        Self { event_type, reduce }
    }
}

/// All reducers a projection registers for one aggregate type.
#[derive(Debug, Clone)]
pub struct AggregateReducer {
    pub aggregate_type: &'static str,
    pub events: Vec<EventReducer>,
}

impl AggregateReducer {
    pub fn new(aggregate_type: &'static str, events: Vec<EventReducer>) -> Self {
        Self {
            aggregate_type,
            events,
        }
    }
}

/// A projection keeps one read table consistent with the event log.
///
/// Projections implement the **CQRS read model pattern**: events from the write
/// side are translated into row mutations against a read-optimized table.
///
/// ## Dispatch
///
/// A projection declares a table of `(aggregate type, event type) -> reducer`.
/// Several aggregate types may feed the same projection: a user's IdP link rows
/// are also touched when the owning organization or the IdP configuration
/// disappears. Every reducer must target [`Projection::table`].
///
/// ## Purity
///
/// Reducers are pure functions of the event. They never read the database and
/// never decide whether a statement is stale: sequence gating is the
/// executor's job, driven by the `sequence` each [`Statement`] carries.
///
/// ## Unhandled events
///
/// - An aggregate type the projection does not subscribe to yields `Ok(None)`.
/// - An event type of a subscribed aggregate without a reducer yields a no-op
///   statement, so the recorded sequence still advances past it.
pub trait Projection: Send + Sync {
    /// Stable name of the read model, used as the bookkeeping key.
    fn name(&self) -> &'static str;

    /// The one physical table this projection writes.
    fn table(&self) -> &'static str;

    /// The dispatch table.
    fn reducers(&self) -> &[AggregateReducer];

    /// Route `event` to its reducer.
    fn reduce(&self, event: &EventEnvelope) -> Result<Option<Statement>, ReduceError> {
        let Some(aggregate) = self
            .reducers()
            .iter()
            .find(|r| event.aggregate_type() == r.aggregate_type)
        else {
            return Ok(None);
        };

        let Some(reducer) = aggregate
            .events
            .iter()
            .find(|r| event.event_type() == r.event_type)
        else {
            return Ok(Some(Statement::no_op(self.name(), self.table(), event)));
        };

        let statement = (reducer.reduce)(event)?;
        if statement.table != self.table() {
            return Err(ReduceError::ForeignTable {
                projection: self.name(),
                expected: self.table(),
                found: statement.table,
            });
        }
        Ok(Some(statement))
    }
}
