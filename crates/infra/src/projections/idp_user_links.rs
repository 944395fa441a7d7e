//! IdP user links: which external identity provider accounts are linked to
//! which users.
//!
//! Rows are written by user events and cleaned up by cascades from the user,
//! its organization and the IdP configuration owners.

use authplane_events::{
    AggregateReducer, Column, Condition, EventEnvelope, EventReducer, Projection, ReduceError,
    Statement, ensure_event,
};
use authplane_identity::{IdpConfigRemoved, IdpLinkAdded, IdpLinkRemoved, instance, org, user};

pub const TABLE: &str = "projections.idp_user_links3";
/// Projections are keyed by their table name.
pub const NAME: &str = TABLE;

pub const IDP_ID: &str = "idp_id";
pub const USER_ID: &str = "user_id";
pub const EXTERNAL_USER_ID: &str = "external_user_id";
pub const CREATION_DATE: &str = "creation_date";
pub const CHANGE_DATE: &str = "change_date";
pub const SEQUENCE: &str = "sequence";
pub const RESOURCE_OWNER: &str = "resource_owner";
pub const INSTANCE_ID: &str = "instance_id";
pub const DISPLAY_NAME: &str = "display_name";
pub const OWNER_REMOVED: &str = "owner_removed";

/// DDL for [`TABLE`] and its lookup indexes.
pub const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS projections.idp_user_links3 (
    idp_id           TEXT        NOT NULL,
    user_id          TEXT        NOT NULL,
    external_user_id TEXT        NOT NULL,
    creation_date    TIMESTAMPTZ NOT NULL,
    change_date      TIMESTAMPTZ NOT NULL,
    sequence         BIGINT      NOT NULL,
    resource_owner   TEXT        NOT NULL,
    instance_id      TEXT        NOT NULL,
    display_name     TEXT        NOT NULL DEFAULT '',
    owner_removed    BOOLEAN     NOT NULL DEFAULT false,
    PRIMARY KEY (instance_id, idp_id, external_user_id)
)
"#,
    "CREATE INDEX IF NOT EXISTS idp_user_links3_user_idx ON projections.idp_user_links3 (user_id)",
    "CREATE INDEX IF NOT EXISTS idp_user_links3_owner_removed_idx ON projections.idp_user_links3 (owner_removed)",
];

#[derive(Debug, Clone)]
pub struct IdpUserLinkProjection {
    reducers: Vec<AggregateReducer>,
}

impl IdpUserLinkProjection {
    pub fn new() -> Self {
        Self {
            reducers: vec![
                AggregateReducer::new(
                    user::AGGREGATE_TYPE,
                    vec![
                        EventReducer::new(user::IDP_LINK_ADDED, reduce_added),
                        EventReducer::new(user::IDP_LINK_REMOVED, reduce_removed),
                        EventReducer::new(user::IDP_LINK_CASCADE_REMOVED, reduce_cascade_removed),
                        EventReducer::new(user::USER_REMOVED, reduce_user_removed),
                    ],
                ),
                AggregateReducer::new(
                    org::AGGREGATE_TYPE,
                    vec![
                        EventReducer::new(org::ORG_REMOVED, reduce_owner_removed),
                        EventReducer::new(org::IDP_CONFIG_REMOVED, reduce_idp_config_removed),
                    ],
                ),
                AggregateReducer::new(
                    instance::AGGREGATE_TYPE,
                    vec![EventReducer::new(
                        instance::IDP_CONFIG_REMOVED,
                        reduce_idp_config_removed,
                    )],
                ),
            ],
        }
    }
}

impl Default for IdpUserLinkProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl Projection for IdpUserLinkProjection {
    fn name(&self) -> &'static str {
        NAME
    }

    fn table(&self) -> &'static str {
        TABLE
    }

    fn reducers(&self) -> &[AggregateReducer] {
        &self.reducers
    }
}

pub fn reduce_added(event: &EventEnvelope) -> Result<Statement, ReduceError> {
    ensure_event(event, &[(user::AGGREGATE_TYPE, user::IDP_LINK_ADDED)])?;
    let payload: IdpLinkAdded = event
        .decode_payload()
        .map_err(|e| ReduceError::payload(event, e))?;

    Ok(Statement::insert(
        NAME,
        TABLE,
        event,
        vec![
            Column::new(IDP_ID, payload.idp_config_id),
            Column::new(USER_ID, event.aggregate_id().as_str()),
            Column::new(EXTERNAL_USER_ID, payload.external_user_id),
            Column::new(CREATION_DATE, event.created_at()),
            Column::new(CHANGE_DATE, event.created_at()),
            Column::new(SEQUENCE, event.sequence()),
            Column::new(RESOURCE_OWNER, event.resource_owner().as_str()),
            Column::new(INSTANCE_ID, event.instance_id().as_str()),
            Column::new(DISPLAY_NAME, payload.display_name),
        ],
    ))
}

pub fn reduce_removed(event: &EventEnvelope) -> Result<Statement, ReduceError> {
    ensure_event(event, &[(user::AGGREGATE_TYPE, user::IDP_LINK_REMOVED)])?;
    delete_link(event)
}

pub fn reduce_cascade_removed(event: &EventEnvelope) -> Result<Statement, ReduceError> {
    ensure_event(event, &[(user::AGGREGATE_TYPE, user::IDP_LINK_CASCADE_REMOVED)])?;
    delete_link(event)
}

fn delete_link(event: &EventEnvelope) -> Result<Statement, ReduceError> {
    let payload: IdpLinkRemoved = event
        .decode_payload()
        .map_err(|e| ReduceError::payload(event, e))?;

    Ok(Statement::delete(
        NAME,
        TABLE,
        event,
        vec![
            Condition::eq(IDP_ID, payload.idp_config_id),
            Condition::eq(USER_ID, event.aggregate_id().as_str()),
            Condition::eq(EXTERNAL_USER_ID, payload.external_user_id),
        ],
    ))
}

/// The organization is gone; its links stay, flagged.
pub fn reduce_owner_removed(event: &EventEnvelope) -> Result<Statement, ReduceError> {
    ensure_event(event, &[(org::AGGREGATE_TYPE, org::ORG_REMOVED)])?;

    Ok(Statement::update(
        NAME,
        TABLE,
        event,
        vec![Column::new(OWNER_REMOVED, true)],
        vec![
            Condition::eq(INSTANCE_ID, event.instance_id().as_str()),
            Condition::eq(RESOURCE_OWNER, event.aggregate_id().as_str()),
        ],
    ))
}

pub fn reduce_user_removed(event: &EventEnvelope) -> Result<Statement, ReduceError> {
    ensure_event(event, &[(user::AGGREGATE_TYPE, user::USER_REMOVED)])?;

    Ok(Statement::delete(
        NAME,
        TABLE,
        event,
        vec![Condition::eq(USER_ID, event.aggregate_id().as_str())],
    ))
}

/// Handles the removal from both owners: organizations and the instance.
pub fn reduce_idp_config_removed(event: &EventEnvelope) -> Result<Statement, ReduceError> {
    ensure_event(
        event,
        &[
            (org::AGGREGATE_TYPE, org::IDP_CONFIG_REMOVED),
            (instance::AGGREGATE_TYPE, instance::IDP_CONFIG_REMOVED),
        ],
    )?;
    let payload: IdpConfigRemoved = event
        .decode_payload()
        .map_err(|e| ReduceError::payload(event, e))?;

    Ok(Statement::delete(
        NAME,
        TABLE,
        event,
        vec![
            Condition::eq(IDP_ID, payload.idp_config_id),
            Condition::eq(RESOURCE_OWNER, event.resource_owner().as_str()),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use authplane_events::{Aggregate, Operation, Value};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{Value as JsonValue, json};

    use crate::executor::render;

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap()
    }

    fn event(aggregate_type: &str, event_type: &str, payload: JsonValue) -> EventEnvelope {
        EventEnvelope::new(
            Aggregate::new(aggregate_type, "agg-id", "instance-id", "ro-id"),
            event_type,
            15,
            10,
            created_at(),
            payload,
        )
    }

    fn base_event() -> EventEnvelope {
        event("test", "test.event", json!({}))
    }

    fn link_payload() -> JsonValue {
        json!({"idpConfigId": "idp-config-id", "userId": "external-user-id"})
    }

    fn assert_rejects_mismatch(reduce: fn(&EventEnvelope) -> Result<Statement, ReduceError>) {
        let err = reduce(&base_event()).unwrap_err();
        assert!(matches!(err, ReduceError::InvalidEvent { .. }), "{err}");
    }

    fn assert_scoped(statement: &Statement, aggregate_type: &str) {
        assert_eq!(statement.projection, TABLE);
        assert_eq!(statement.table, TABLE);
        assert_eq!(statement.aggregate_type, aggregate_type);
        assert_eq!(statement.sequence, 15);
        assert_eq!(statement.previous_sequence, 10);
    }

    fn sql(statement: &Statement) -> (String, Vec<Value>) {
        let rendered = render(statement).unwrap().unwrap();
        (rendered.sql, rendered.args)
    }

    #[test]
    fn reduce_added_inserts_the_link() {
        assert_rejects_mismatch(reduce_added);

        let statement = reduce_added(&event(
            user::AGGREGATE_TYPE,
            user::IDP_LINK_ADDED,
            json!({
                "idpConfigId": "idp-config-id",
                "userId": "external-user-id",
                "displayName": "gigi@caos.ch"
            }),
        ))
        .unwrap();
        assert_scoped(&statement, "user");

        let (sql, args) = sql(&statement);
        assert_eq!(
            sql,
            "INSERT INTO projections.idp_user_links3 (idp_id, user_id, external_user_id, creation_date, change_date, sequence, resource_owner, instance_id, display_name) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        assert_eq!(
            args,
            vec![
                Value::from("idp-config-id"),
                Value::from("agg-id"),
                Value::from("external-user-id"),
                Value::Timestamp(created_at()),
                Value::Timestamp(created_at()),
                Value::UInt(15),
                Value::from("ro-id"),
                Value::from("instance-id"),
                Value::from("gigi@caos.ch"),
            ]
        );
    }

    #[test]
    fn reduce_removed_deletes_by_natural_key() {
        assert_rejects_mismatch(reduce_removed);

        let statement =
            reduce_removed(&event(user::AGGREGATE_TYPE, user::IDP_LINK_REMOVED, link_payload()))
                .unwrap();
        assert_scoped(&statement, "user");

        let (sql, args) = sql(&statement);
        assert_eq!(
            sql,
            "DELETE FROM projections.idp_user_links3 WHERE (idp_id = $1) AND (user_id = $2) AND (external_user_id = $3)"
        );
        assert_eq!(
            args,
            vec![
                Value::from("idp-config-id"),
                Value::from("agg-id"),
                Value::from("external-user-id"),
            ]
        );
    }

    #[test]
    fn reduce_cascade_removed_deletes_by_natural_key() {
        assert_rejects_mismatch(reduce_cascade_removed);

        let statement = reduce_cascade_removed(&event(
            user::AGGREGATE_TYPE,
            user::IDP_LINK_CASCADE_REMOVED,
            link_payload(),
        ))
        .unwrap();
        assert_scoped(&statement, "user");

        let (sql, args) = sql(&statement);
        assert_eq!(
            sql,
            "DELETE FROM projections.idp_user_links3 WHERE (idp_id = $1) AND (user_id = $2) AND (external_user_id = $3)"
        );
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn reduce_owner_removed_flags_instead_of_deleting() {
        assert_rejects_mismatch(reduce_owner_removed);

        let statement =
            reduce_owner_removed(&event(org::AGGREGATE_TYPE, org::ORG_REMOVED, json!({}))).unwrap();
        assert_scoped(&statement, "org");
        assert!(matches!(statement.operation, Operation::Update { .. }));

        let (sql, args) = sql(&statement);
        assert_eq!(
            sql,
            "UPDATE projections.idp_user_links3 SET owner_removed = $1 WHERE (instance_id = $2) AND (resource_owner = $3)"
        );
        assert_eq!(
            args,
            vec![Value::Bool(true), Value::from("instance-id"), Value::from("agg-id")]
        );
    }

    #[test]
    fn reduce_user_removed_deletes_every_link_of_the_user() {
        assert_rejects_mismatch(reduce_user_removed);

        let statement =
            reduce_user_removed(&event(user::AGGREGATE_TYPE, user::USER_REMOVED, json!({})))
                .unwrap();
        assert_scoped(&statement, "user");

        let (sql, args) = sql(&statement);
        assert_eq!(sql, "DELETE FROM projections.idp_user_links3 WHERE (user_id = $1)");
        assert_eq!(args, vec![Value::from("agg-id")]);
    }

    #[test]
    fn reduce_idp_config_removed_for_org_and_instance() {
        assert_rejects_mismatch(reduce_idp_config_removed);

        for (aggregate_type, event_type) in [
            (org::AGGREGATE_TYPE, org::IDP_CONFIG_REMOVED),
            (instance::AGGREGATE_TYPE, instance::IDP_CONFIG_REMOVED),
        ] {
            let statement = reduce_idp_config_removed(&event(
                aggregate_type,
                event_type,
                json!({"idpConfigId": "idp-config-id"}),
            ))
            .unwrap();
            assert_scoped(&statement, aggregate_type);

            let (sql, args) = sql(&statement);
            assert_eq!(
                sql,
                "DELETE FROM projections.idp_user_links3 WHERE (idp_id = $1) AND (resource_owner = $2)"
            );
            assert_eq!(args, vec![Value::from("idp-config-id"), Value::from("ro-id")]);
        }
    }

    #[test]
    fn reducers_reject_each_others_events() {
        let user_removed = event(user::AGGREGATE_TYPE, user::USER_REMOVED, json!({}));
        assert!(reduce_added(&user_removed).is_err());
        assert!(reduce_owner_removed(&user_removed).is_err());

        let org_idp_removed = event(
            org::AGGREGATE_TYPE,
            org::IDP_CONFIG_REMOVED,
            json!({"idpConfigId": "x"}),
        );
        assert!(reduce_user_removed(&org_idp_removed).is_err());
    }

    #[test]
    fn undecodable_payload_is_a_payload_error() {
        let err = reduce_added(&event(
            user::AGGREGATE_TYPE,
            user::IDP_LINK_ADDED,
            json!({"idpConfigId": 42}),
        ))
        .unwrap_err();
        assert!(matches!(err, ReduceError::Payload { .. }));
    }

    #[test]
    fn projection_dispatches_every_subscribed_event() {
        let projection = IdpUserLinkProjection::new();

        let cases = [
            (user::AGGREGATE_TYPE, user::IDP_LINK_ADDED, link_payload()),
            (user::AGGREGATE_TYPE, user::IDP_LINK_REMOVED, link_payload()),
            (user::AGGREGATE_TYPE, user::IDP_LINK_CASCADE_REMOVED, link_payload()),
            (user::AGGREGATE_TYPE, user::USER_REMOVED, json!({})),
            (org::AGGREGATE_TYPE, org::ORG_REMOVED, json!({})),
            (org::AGGREGATE_TYPE, org::IDP_CONFIG_REMOVED, json!({"idpConfigId": "i"})),
            (instance::AGGREGATE_TYPE, instance::IDP_CONFIG_REMOVED, json!({"idpConfigId": "i"})),
        ];
        for (aggregate_type, event_type, payload) in cases {
            let statement = projection
                .reduce(&event(aggregate_type, event_type, payload))
                .unwrap()
                .unwrap();
            assert_ne!(statement.operation, Operation::NoOp, "{event_type}");
        }
    }

    #[test]
    fn projection_no_ops_unhandled_events_of_subscribed_aggregates() {
        let projection = IdpUserLinkProjection::new();

        let statement = projection
            .reduce(&event(user::AGGREGATE_TYPE, "user.human.email.changed", json!({})))
            .unwrap()
            .unwrap();
        assert_eq!(statement.operation, Operation::NoOp);

        assert!(projection.reduce(&base_event()).unwrap().is_none());
    }
}
