//! Rendering statements into positional PostgreSQL-wire SQL.

use std::fmt::Write as _;

use authplane_events::{Column, Condition, Operation, Statement, Value};

use super::StatementError;

/// SQL text plus its `$n` arguments, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStatement {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Render `statement`, or `None` for a no-op.
///
/// Inserts need at least one column; updates and deletes need at least one
/// condition so that no statement can touch a whole table.
pub fn render(statement: &Statement) -> Result<Option<RenderedStatement>, StatementError> {
    let projection = statement.projection;
    check_identifier(projection, statement.table, true)?;

    let rendered = match &statement.operation {
        Operation::NoOp => return Ok(None),
        Operation::Insert { columns } => {
            non_empty(projection, columns, "insert without columns")?;
            let mut args = Vec::with_capacity(columns.len());
            let names = column_list(projection, columns, &mut args)?;
            let placeholders = placeholders(1, columns.len());
            RenderedStatement {
                sql: format!(
                    "INSERT INTO {} ({names}) VALUES ({placeholders})",
                    statement.table
                ),
                args,
            }
        }
        Operation::Update {
            columns,
            conditions,
        } => {
            non_empty(projection, columns, "update without columns")?;
            non_empty(projection, conditions, "update without conditions")?;
            let mut args = Vec::with_capacity(columns.len() + conditions.len());
            let names = column_list(projection, columns, &mut args)?;
            let set = if columns.len() == 1 {
                format!("{names} = $1")
            } else {
                format!("({names}) = ({})", placeholders(1, columns.len()))
            };
            let predicate = where_clause(projection, conditions, &mut args)?;
            RenderedStatement {
                sql: format!("UPDATE {} SET {set} WHERE {predicate}", statement.table),
                args,
            }
        }
        Operation::Delete { conditions } => {
            non_empty(projection, conditions, "delete without conditions")?;
            let mut args = Vec::with_capacity(conditions.len());
            let predicate = where_clause(projection, conditions, &mut args)?;
            RenderedStatement {
                sql: format!("DELETE FROM {} WHERE {predicate}", statement.table),
                args,
            }
        }
    };

    Ok(Some(rendered))
}

fn column_list(
    projection: &'static str,
    columns: &[Column],
    args: &mut Vec<Value>,
) -> Result<String, StatementError> {
    let mut names = Vec::with_capacity(columns.len());
    for column in columns {
        check_identifier(projection, column.name, false)?;
        names.push(column.name);
        args.push(column.value.clone());
    }
    Ok(names.join(", "))
}

// Placeholders continue after whatever is already in `args`.
fn where_clause(
    projection: &'static str,
    conditions: &[Condition],
    args: &mut Vec<Value>,
) -> Result<String, StatementError> {
    let mut sql = String::new();
    for (i, condition) in conditions.iter().enumerate() {
        check_identifier(projection, condition.column, false)?;
        if condition.value.is_null() {
            return Err(StatementError::malformed(
                projection,
                format!("condition on {} compares with NULL", condition.column),
            ));
        }
        args.push(condition.value.clone());
        if i > 0 {
            sql.push_str(" AND ");
        }
        let _ = write!(sql, "({} = ${})", condition.column, args.len());
    }
    Ok(sql)
}

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn non_empty<T>(projection: &'static str, items: &[T], reason: &str) -> Result<(), StatementError> {
    if items.is_empty() {
        Err(StatementError::malformed(projection, reason))
    } else {
        Ok(())
    }
}

/// Lowercase snake_case identifiers; tables may carry one schema prefix.
fn check_identifier(
    projection: &'static str,
    name: &str,
    qualified: bool,
) -> Result<(), StatementError> {
    let parts: Vec<&str> = name.split('.').collect();
    let valid_part = |part: &&str| {
        part.chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    };
    let shape_ok = match parts.len() {
        1 => true,
        2 => qualified,
        _ => false,
    };

    if shape_ok && parts.iter().all(valid_part) {
        Ok(())
    } else {
        Err(StatementError::malformed(
            projection,
            format!("invalid identifier {name:?}"),
        ))
    }
}
