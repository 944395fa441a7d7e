//! Bookkeeping schema and the SQL the PostgreSQL executor runs against it.

pub const CREATE_PROJECTIONS_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS projections";

/// Last applied sequence per (projection, instance, aggregate).
pub const CREATE_CURRENT_SEQUENCES: &str = r#"
CREATE TABLE IF NOT EXISTS projections.current_sequences (
    projection_name   TEXT        NOT NULL,
    instance_id       TEXT        NOT NULL,
    aggregate_type    TEXT        NOT NULL,
    aggregate_id      TEXT        NOT NULL,
    current_sequence  BIGINT      NOT NULL CHECK (current_sequence >= 0),
    previous_sequence BIGINT      NOT NULL DEFAULT 0,
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (projection_name, instance_id, aggregate_type, aggregate_id)
)
"#;

pub(crate) const LOCK_CURRENT_SEQUENCE: &str = r#"
SELECT current_sequence
FROM projections.current_sequences
WHERE projection_name = $1 AND instance_id = $2 AND aggregate_type = $3 AND aggregate_id = $4
FOR UPDATE
"#;

pub(crate) const SELECT_CURRENT_SEQUENCE: &str = r#"
SELECT current_sequence
FROM projections.current_sequences
WHERE projection_name = $1 AND instance_id = $2 AND aggregate_type = $3 AND aggregate_id = $4
"#;

/// Advances the scope only forward. Returns no row when a concurrent writer
/// already recorded an equal or newer sequence.
pub(crate) const ADVANCE_CURRENT_SEQUENCE: &str = r#"
INSERT INTO projections.current_sequences AS cs
    (projection_name, instance_id, aggregate_type, aggregate_id, current_sequence, previous_sequence, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, now())
ON CONFLICT (projection_name, instance_id, aggregate_type, aggregate_id) DO UPDATE
SET current_sequence = EXCLUDED.current_sequence,
    previous_sequence = EXCLUDED.previous_sequence,
    updated_at = EXCLUDED.updated_at
WHERE cs.current_sequence < EXCLUDED.current_sequence
RETURNING current_sequence
"#;

pub(crate) const RESET_SEQUENCES: &str = r#"
DELETE FROM projections.current_sequences
WHERE projection_name = $1 AND instance_id = $2
"#;
