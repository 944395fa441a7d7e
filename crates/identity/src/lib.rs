//! Catalog of the identity aggregates whose events feed the read models.
//!
//! The aggregates themselves (command handling, business rules) live on the
//! write side. This crate only pins down what the projections consume:
//! aggregate type names, event type names and the payload shapes.

pub mod idp;
pub mod instance;
pub mod org;
pub mod user;

pub use idp::IdpConfigRemoved;
pub use user::{IdpLinkAdded, IdpLinkRemoved};
