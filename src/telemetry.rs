//! Logging setup and metric shims.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Emit JSON lines instead of the human format.
    pub json_logs: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Install a global subscriber.
///
/// Returns `false` when a subscriber was already installed, which is normal
/// when the host owns logging.
pub fn init_tracing(config: &TracingConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_logs {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .is_ok()
    } else {
        registry
            .with(fmt::layer().with_target(true))
            .try_init()
            .is_ok()
    }
}
