//! Payloads shared by every aggregate that can own an identity provider configuration.

use serde::{Deserialize, Serialize};

/// An IdP configuration was removed from its owner (organization or instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpConfigRemoved {
    pub idp_config_id: String,
}
