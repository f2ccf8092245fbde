//! Structured logging setup.
//!
//! Events carry the per-connection `trace_id` and upstream identity as
//! span fields. The level comes from `logging.level` in the config and is
//! swapped in place when the config reloads.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Handle for swapping the active log level on config reload.
pub struct LogLevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    pub fn set_level(&self, level: &str) {
        if let Err(error) = self.handle.reload(filter_for(level)) {
            tracing::warn!(%error, "Failed to update log level");
        }
    }
}

/// Install the global subscriber. Call once at startup, before any other
/// task logs.
pub fn init(level: &str) -> LogLevelHandle {
    let (filter, handle) = reload::Layer::new(filter_for(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();

    LogLevelHandle { handle }
}

fn filter_for(level: &str) -> EnvFilter {
    // Config uses "warning"; tracing spells it "warn".
    let level = match level.to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relay_proxy={}", level)))
}
