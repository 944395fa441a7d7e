//! Organization aggregate events.

pub const AGGREGATE_TYPE: &str = "org";

pub const ORG_REMOVED: &str = "org.removed";
pub const IDP_CONFIG_REMOVED: &str = "org.idp.config.removed";
