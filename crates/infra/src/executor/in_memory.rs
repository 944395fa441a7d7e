//! In-memory executor for tests/dev.
//!
//! Applies the same operations and sequence gating as the PostgreSQL
//! executor against plain in-process tables.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use authplane_core::InstanceId;
use authplane_events::{Column, Condition, Operation, Statement, Value};

use super::render::render;
use super::{Applied, Gate, SequenceScope, StatementError, StatementExecutor, gate};

/// One row, keyed by column name.
pub type Row = BTreeMap<&'static str, Value>;

#[derive(Debug, Default)]
struct State {
    tables: HashMap<&'static str, Vec<Row>>,
    sequences: HashMap<SequenceScope, u64>,
}

#[derive(Debug, Default)]
pub struct InMemoryExecutor {
    state: RwLock<State>,
    unique_keys: HashMap<&'static str, Vec<&'static str>>,
    detect_gaps: bool,
}

impl InMemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts that duplicate `columns` of an existing row in `table`,
    /// like a primary key would.
    pub fn with_unique_key(mut self, table: &'static str, columns: &[&'static str]) -> Self {
        self.unique_keys.insert(table, columns.to_vec());
        self
    }

    pub fn with_gap_detection(mut self, enabled: bool) -> Self {
        self.detect_gaps = enabled;
        self
    }

    /// Snapshot of `table`'s rows in insertion order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, StatementError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.tables.get(table).cloned().unwrap_or_default())
    }

    fn poisoned() -> StatementError {
        StatementError::Database {
            operation: "in_memory",
            code: None,
            message: "lock poisoned".to_string(),
            retryable: false,
        }
    }
}

#[async_trait]
impl StatementExecutor for InMemoryExecutor {
    async fn apply(&self, statement: &Statement) -> Result<Applied, StatementError> {
        // Same validation as the SQL path, so malformed statements fail here too.
        render(statement)?;

        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let scope = SequenceScope::of(statement);

        let current = state.sequences.get(&scope).copied();
        if let Gate::Skip { current_sequence } = gate(current, statement, self.detect_gaps)? {
            return Ok(Applied::Skipped { current_sequence });
        }

        let table = state.tables.entry(statement.table).or_default();
        let rows_affected = match &statement.operation {
            Operation::NoOp => 0,
            Operation::Insert { columns } => {
                let row: Row = columns.iter().map(|c| (c.name, c.value.clone())).collect();
                if let Some(key) = self.unique_keys.get(statement.table) {
                    let duplicate = table
                        .iter()
                        .any(|existing| key.iter().all(|k| existing.get(*k) == row.get(*k)));
                    if duplicate {
                        return Err(StatementError::Database {
                            operation: "mutate",
                            code: Some("23505".to_string()),
                            message: format!(
                                "duplicate key value violates unique constraint on {}",
                                statement.table
                            ),
                            retryable: false,
                        });
                    }
                }
                table.push(row);
                1
            }
            Operation::Update {
                columns,
                conditions,
            } => {
                let mut updated = 0;
                for row in table.iter_mut().filter(|row| matches_all(row, conditions)) {
                    assign(row, columns);
                    updated += 1;
                }
                updated
            }
            Operation::Delete { conditions } => {
                let before = table.len();
                table.retain(|row| !matches_all(row, conditions));
                (before - table.len()) as u64
            }
        };

        state.sequences.insert(scope, statement.sequence);
        Ok(Applied::Executed { rows_affected })
    }

    async fn current_sequence(&self, scope: &SequenceScope) -> Result<Option<u64>, StatementError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.sequences.get(scope).copied())
    }

    async fn reset_sequences(
        &self,
        projection: &'static str,
        instance_id: &InstanceId,
    ) -> Result<u64, StatementError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let before = state.sequences.len();
        state
            .sequences
            .retain(|scope, _| !(scope.projection == projection && &scope.instance_id == instance_id));
        Ok((before - state.sequences.len()) as u64)
    }
}

// SQL equality: a missing or NULL column never matches.
fn matches_all(row: &Row, conditions: &[Condition]) -> bool {
    conditions.iter().all(|c| match row.get(c.column) {
        Some(Value::Null(_)) | None => false,
        Some(value) => *value == c.value,
    })
}

fn assign(row: &mut Row, columns: &[Column]) {
    for column in columns {
        row.insert(column.name, column.value.clone());
    }
}
