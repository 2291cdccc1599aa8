//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the log filter. `RUST_LOG` is the fallback.
pub const LOG_ENV: &str = "ILLUMINATOR_LOG";

/// Picks the filter: `ILLUMINATOR_LOG`, then `RUST_LOG`, then `default_filter`.
pub fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Installs a global fmt subscriber writing to stderr.
///
/// Returns false if a subscriber was already installed, which is harmless
/// when embedding into a host that configures tracing itself.
pub fn init(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
