//! User aggregate events relevant to read models.

use serde::{Deserialize, Serialize};

pub const AGGREGATE_TYPE: &str = "user";

pub const IDP_LINK_ADDED: &str = "user.human.externalidp.added";
pub const IDP_LINK_REMOVED: &str = "user.human.externalidp.removed";
pub const IDP_LINK_CASCADE_REMOVED: &str = "user.human.externalidp.cascade.removed";
pub const USER_REMOVED: &str = "user.removed";

/// A human user linked an account at an external identity provider.
///
/// `userId` in the payload is the user's identifier *at the provider*, not the
/// aggregate id of the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpLinkAdded {
    pub idp_config_id: String,
    #[serde(rename = "userId")]
    pub external_user_id: String,
    #[serde(default)]
    pub display_name: String,
}

/// A link to an external identity provider was removed, either directly or as
/// a cascade of the provider configuration being removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpLinkRemoved {
    pub idp_config_id: String,
    #[serde(rename = "userId")]
    pub external_user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_added_reads_external_user_id_from_user_id_field() {
        let payload: IdpLinkAdded = serde_json::from_str(
            r#"{"idpConfigId": "idp-config-id", "userId": "external-user-id", "displayName": "gigi@caos.ch"}"#,
        )
        .unwrap();

        assert_eq!(payload.idp_config_id, "idp-config-id");
        assert_eq!(payload.external_user_id, "external-user-id");
        assert_eq!(payload.display_name, "gigi@caos.ch");
    }

    #[test]
    fn display_name_is_optional() {
        let payload: IdpLinkAdded =
            serde_json::from_str(r#"{"idpConfigId": "a", "userId": "b"}"#).unwrap();
        assert_eq!(payload.display_name, "");
    }
}
