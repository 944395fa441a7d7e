//! Dialect-neutral description of a row mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use authplane_core::{AggregateId, AggregateType, InstanceId};

use crate::EventEnvelope;

/// A value bound as a positional argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Int(i64),
    /// Unsigned counters such as event sequences.
    UInt(u64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// SQL NULL, bound with the parameter type of the column it targets.
    Null(ValueKind),
}

/// Parameter type of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Text,
    Int,
    Bool,
    Timestamp,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Int(_) | Value::UInt(_) => ValueKind::Int,
            Value::Bool(_) => ValueKind::Bool,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Null(kind) => *kind,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }
}

/// Rust types with a fixed SQL parameter type.
pub trait Typed {
    const KIND: ValueKind;
}

impl Typed for &str {
    const KIND: ValueKind = ValueKind::Text;
}

impl Typed for String {
    const KIND: ValueKind = ValueKind::Text;
}

impl Typed for &String {
    const KIND: ValueKind = ValueKind::Text;
}

impl Typed for i64 {
    const KIND: ValueKind = ValueKind::Int;
}

impl Typed for u64 {
    const KIND: ValueKind = ValueKind::Int;
}

impl Typed for bool {
    const KIND: ValueKind = ValueKind::Bool;
}

impl Typed for DateTime<Utc> {
    const KIND: ValueKind = ValueKind::Timestamp;
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<Value> + Typed> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null(T::KIND), Into::into)
    }
}

/// A column written by an insert or update.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub value: Value,
}

impl Column {
    pub fn new(name: &'static str, value: impl Into<Value>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// An equality predicate; conditions of a statement are conjoined.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: &'static str,
    pub value: Value,
}

impl Condition {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }
}

/// The mutation a statement performs. Column order is positional and part of
/// the contract with the rendered SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        columns: Vec<Column>,
    },
    Update {
        columns: Vec<Column>,
        conditions: Vec<Condition>,
    },
    Delete {
        conditions: Vec<Condition>,
    },
    /// Advances the projection's sequence without touching any row.
    NoOp,
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
            Operation::NoOp => "noop",
        }
    }
}

/// Output of reducing one event: which projection table to mutate, how, and
/// the originating event's position in its aggregate stream.
///
/// Statements are transient values owned by whoever applies them.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub projection: &'static str,
    pub table: &'static str,

    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub instance_id: InstanceId,

    pub sequence: u64,
    pub previous_sequence: u64,

    pub operation: Operation,
}

impl Statement {
    /// Statement scoped to `event`'s aggregate and position.
    pub fn for_event(
        projection: &'static str,
        table: &'static str,
        event: &EventEnvelope,
        operation: Operation,
    ) -> Self {
        Self {
            projection,
            table,
            aggregate_type: event.aggregate_type().clone(),
            aggregate_id: event.aggregate_id().clone(),
            instance_id: event.instance_id().clone(),
            sequence: event.sequence(),
            previous_sequence: event.previous_sequence(),
            operation,
        }
    }

    pub fn insert(
        projection: &'static str,
        table: &'static str,
        event: &EventEnvelope,
        columns: Vec<Column>,
    ) -> Self {
        Self::for_event(projection, table, event, Operation::Insert { columns })
    }

    pub fn update(
        projection: &'static str,
        table: &'static str,
        event: &EventEnvelope,
        columns: Vec<Column>,
        conditions: Vec<Condition>,
    ) -> Self {
        Self::for_event(
            projection,
            table,
            event,
            Operation::Update {
                columns,
                conditions,
            },
        )
    }

    pub fn delete(
        projection: &'static str,
        table: &'static str,
        event: &EventEnvelope,
        conditions: Vec<Condition>,
    ) -> Self {
        Self::for_event(projection, table, event, Operation::Delete { conditions })
    }

    pub fn no_op(projection: &'static str, table: &'static str, event: &EventEnvelope) -> Self {
        Self::for_event(projection, table, event, Operation::NoOp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_values_keep_their_column_type() {
        assert_eq!(Value::from(None::<bool>), Value::Null(ValueKind::Bool));
        assert_eq!(Value::from(None::<u64>).kind(), ValueKind::Int);
        assert_eq!(Value::from(Some("gigi@caos.ch")), Value::from("gigi@caos.ch"));
        assert!(Value::from(None::<DateTime<Utc>>).is_null());
    }
}
