//! Explicit dialect registry.
//!
//! Dialects are registered on a [`DialectRegistryBuilder`] during startup;
//! `build()` freezes the set so nothing can be registered once configuration
//! decoding has started.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use super::cockroach::CockroachDialect;
use super::dialect::{Connector, Dialect};
use super::postgres::PostgresDialect;
use crate::config::ConfigError;

#[derive(Default)]
pub struct DialectRegistryBuilder {
    dialects: Vec<Arc<dyn Dialect>>,
}

impl DialectRegistryBuilder {
    pub fn register(mut self, dialect: impl Dialect) -> Self {
        self.dialects.push(Arc::new(dialect));
        self
    }

    /// Register the PostgreSQL and CockroachDB dialects.
    pub fn with_builtin(self) -> Self {
        self.register(PostgresDialect).register(CockroachDialect)
    }

    pub fn build(self) -> DialectRegistry {
        DialectRegistry {
            dialects: self.dialects.into(),
        }
    }
}

/// Read-only set of dialects, shared by reference with configuration decoding.
#[derive(Clone)]
pub struct DialectRegistry {
    dialects: Arc<[Arc<dyn Dialect>]>,
}

impl std::fmt::Debug for DialectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.dialects.iter().map(|d| d.name()))
            .finish()
    }
}

impl DialectRegistry {
    pub fn builder() -> DialectRegistryBuilder {
        DialectRegistryBuilder::default()
    }

    /// Registry holding only the built-in dialects.
    pub fn builtin() -> Self {
        Self::builder().with_builtin().build()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.dialects.iter().map(|d| d.name()).collect()
    }

    /// Pick the single dialect that claims keys of `configured` and decode
    /// all of its fragments.
    ///
    /// Keys that no dialect claims are ignored. Exactly one dialect must claim
    /// at least one key.
    pub fn select_by_config(
        &self,
        configured: &BTreeMap<String, JsonValue>,
    ) -> Result<Arc<dyn Connector>, ConfigError> {
        let mut claims: Vec<(&Arc<dyn Dialect>, Vec<&str>)> = Vec::new();
        for dialect in self.dialects.iter() {
            let keys: Vec<&str> = configured
                .keys()
                .map(String::as_str)
                .filter(|key| dialect.match_name(key))
                .collect();
            if !keys.is_empty() {
                claims.push((dialect, keys));
            }
        }

        match claims.as_slice() {
            [] => Err(ConfigError::NoDialect {
                configured: configured.keys().cloned().collect::<Vec<_>>().join(", "),
                known: self.names().join(", "),
            }),
            [(dialect, keys)] => {
                debug!(dialect = dialect.name(), keys = ?keys, "selected database dialect");
                let fragments: Vec<JsonValue> =
                    keys.iter().map(|key| configured[*key].clone()).collect();
                dialect.decode(&fragments)
            }
            many => Err(ConfigError::AmbiguousDialect(
                many.iter()
                    .map(|(dialect, keys)| format!("{} ({})", dialect.name(), keys.join(", ")))
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }
}

/// Deep-merge configuration fragments in order.
///
/// Objects merge key by key; any other value replaces what was there. A null
/// fragment (an empty YAML block) contributes nothing.
pub fn merge_fragments(fragments: &[JsonValue]) -> JsonValue {
    let mut merged = JsonValue::Object(Map::new());
    for fragment in fragments {
        merge_into(&mut merged, fragment);
    }
    merged
}

fn merge_into(target: &mut JsonValue, source: &JsonValue) {
    match (target, source) {
        (_, JsonValue::Null) => {}
        (JsonValue::Object(target), JsonValue::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}
