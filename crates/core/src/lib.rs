//! `authplane-core` — identifier and error primitives shared by every layer.
//!
//! This crate contains **no infrastructure** concerns: no database, no runtime.

pub mod error;
pub mod id;

pub use error::CoreError;
pub use id::{AggregateId, AggregateType, EventType, InstanceId, ResourceOwner};
