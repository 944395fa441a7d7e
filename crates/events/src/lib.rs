//! Event envelopes and the pure reducer framework.
//!
//! Reducers translate one event into one [`Statement`]: a plain description of
//! a row mutation. Nothing in this crate touches a database; statements are
//! rendered and applied by the infrastructure layer.

pub mod envelope;
pub mod projection;
pub mod statement;
pub mod tenant;

pub use envelope::{Aggregate, EventEnvelope};
pub use projection::{AggregateReducer, EventReducer, Projection, ReduceError, ReduceFn, ensure_event};
pub use statement::{Column, Condition, Operation, Statement, Typed, Value, ValueKind};
pub use tenant::InstanceScoped;
