//! Instance aggregate events.
//!
//! The instance is the tenant itself; its id doubles as the resource owner of
//! instance-level configuration.

pub const AGGREGATE_TYPE: &str = "instance";

pub const IDP_CONFIG_REMOVED: &str = "instance.idp.config.removed";
