//! Statement application errors and their retry classification.
//!
//! ## Error Mapping
//!
//! | Source | SQLSTATE | Retryable | Scenario |
//! |--------|----------|-----------|----------|
//! | Database | `40001` | yes | serialization failure (CockroachDB restart) |
//! | Database | `40P01` | yes | deadlock detected |
//! | Database | `55P03` | yes | lock not available |
//! | Database | `57014` | yes | statement cancelled / timed out |
//! | Database | `08xxx` | yes | connection exception |
//! | Database | `53xxx` | yes | insufficient resources |
//! | Database | `23xxx` | no | integrity constraint violation |
//! | Database | `22xxx`, `42xxx`, other | no | bad data, bad SQL |
//! | PoolTimedOut, Io | n/a | yes | backend busy or unreachable |
//! | everything else | n/a | no | |

use authplane_core::{AggregateId, AggregateType};
use thiserror::Error;

/// Failure applying one statement. Nothing of the statement was persisted.
#[derive(Debug, Error)]
pub enum StatementError {
    /// The statement cannot be rendered; retrying will not help.
    #[error("malformed statement for {projection}: {reason}")]
    Malformed {
        projection: &'static str,
        reason: String,
    },

    #[error("{operation} failed [{}]: {message}", code.as_deref().unwrap_or("-"))]
    Database {
        operation: &'static str,
        code: Option<String>,
        message: String,
        retryable: bool,
    },

    /// The statement's previous sequence is not the one recorded for its scope.
    #[error(
        "sequence gap in {projection} for {aggregate_type}/{aggregate_id}: expected previous sequence {expected}, got {found}"
    )]
    SequenceGap {
        projection: &'static str,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        expected: u64,
        found: u64,
    },
}

impl StatementError {
    pub fn malformed(projection: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            projection,
            reason: reason.into(),
        }
    }

    /// Whether redelivering the same event later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Malformed { .. } => false,
            Self::Database { retryable, .. } => *retryable,
            Self::SequenceGap { .. } => true,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// SQLSTATEs that describe contention or availability rather than bad input.
pub fn is_retryable_sqlstate(code: &str) -> bool {
    matches!(code, "40001" | "40P01" | "55P03" | "57014")
        || code.starts_with("08")
        || code.starts_with("53")
}

pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StatementError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned());
            let retryable = code.as_deref().is_some_and(is_retryable_sqlstate);
            StatementError::Database {
                operation,
                code,
                message: db_err.message().to_string(),
                retryable,
            }
        }
        sqlx::Error::PoolTimedOut => StatementError::Database {
            operation,
            code: None,
            message: "timed out acquiring a connection".to_string(),
            retryable: true,
        },
        sqlx::Error::Io(e) => StatementError::Database {
            operation,
            code: None,
            message: format!("I/O error: {e}"),
            retryable: true,
        },
        other => StatementError::Database {
            operation,
            code: None,
            message: other.to_string(),
            retryable: false,
        },
    }
}
