//! Concrete projections and the handler that feeds them.
//!
//! All projections are:
//! - **Rebuildable**: sequences can be reset and the event log replayed
//! - **Instance-isolated**: every statement is scoped to one instance
//! - **Idempotent**: safe for at-least-once delivery

pub mod handler;
pub mod idp_user_links;

pub use handler::{BatchReport, EventFailure, EventPosition, HandleError, Outcome, ProjectionHandler};
pub use idp_user_links::IdpUserLinkProjection;
