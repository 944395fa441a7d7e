//! Tracing, logging, metrics (shared setup).

/// Initialize process-wide observability (tracing/logging) with defaults.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// In-process counters and gauges.
pub mod metrics;

pub use metrics::{Counter, Gauge};
pub use tracing::{TracingConfig, init_with};
