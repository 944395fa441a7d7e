//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// How log lines are filtered and formatted.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Directive used when `RUST_LOG` is not set.
    pub default_filter: String,
    /// JSON lines (production) or human-readable output (local development).
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            json: true,
        }
    }
}

/// Initialize tracing/logging for the process with the default configuration.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(&TracingConfig::default());
}

/// Initialize tracing/logging with an explicit configuration.
///
/// `RUST_LOG` still takes precedence over `default_filter`.
pub fn init_with(config: &TracingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    if installed.is_ok() {
        ::tracing::debug!(json = config.json, "tracing initialized");
    }
}
