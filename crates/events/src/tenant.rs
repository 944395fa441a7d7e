use authplane_core::{AggregateId, AggregateType, InstanceId};

use crate::{EventEnvelope, Statement};

/// Helper trait for instance-scoped messages.
///
/// Events and the statements reduced from them both belong to exactly one
/// instance and one aggregate. Infrastructure uses that triple as the ordering
/// scope: work for one scope is applied in sequence, different scopes are
/// independent. Aggregate ids are only unique within their type.
pub trait InstanceScoped {
    fn instance_id(&self) -> &InstanceId;

    fn scope_aggregate_type(&self) -> &AggregateType;

    fn scope_aggregate_id(&self) -> &AggregateId;

    /// `(instance, aggregate type, aggregate id)` key of the ordering scope.
    fn scope_key(&self) -> (InstanceId, AggregateType, AggregateId) {
        (
            self.instance_id().clone(),
            self.scope_aggregate_type().clone(),
            self.scope_aggregate_id().clone(),
        )
    }
}

impl InstanceScoped for EventEnvelope {
    fn instance_id(&self) -> &InstanceId {
        EventEnvelope::instance_id(self)
    }

    fn scope_aggregate_type(&self) -> &AggregateType {
        self.aggregate_type()
    }

    fn scope_aggregate_id(&self) -> &AggregateId {
        self.aggregate_id()
    }
}

impl InstanceScoped for Statement {
    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn scope_aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    fn scope_aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Aggregate, Operation};
    use chrono::Utc;
    use serde_json::json;

    fn event(aggregate_type: &str) -> EventEnvelope {
        EventEnvelope::new(
            Aggregate::new(aggregate_type, "x", "instance-id", "ro-id"),
            format!("{aggregate_type}.removed"),
            2,
            1,
            Utc::now(),
            json!({}),
        )
    }

    #[test]
    fn statement_shares_the_scope_of_its_event() {
        let event = event("user");
        let statement = Statement::for_event("links", "projections.links", &event, Operation::NoOp);
        assert_eq!(statement.scope_key(), event.scope_key());
    }

    #[test]
    fn aggregate_type_is_part_of_the_scope() {
        assert_ne!(event("user").scope_key(), event("org").scope_key());
    }
}
