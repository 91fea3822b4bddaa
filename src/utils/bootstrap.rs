//! Process bootstrap helpers for services embedding the store.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the tracing filter directive.
pub const LOG_ENV: &str = "TIDEMARK_LOG";

/// Initialize tracing with the TIDEMARK_LOG environment variable.
///
/// Defaults to "info" level if TIDEMARK_LOG is not set.
///
/// # Panics
///
/// Panics if a global subscriber is already installed; use
/// [`try_init_tracing`] where that may happen.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Like [`init_tracing`], but returns false instead of panicking when a
/// subscriber is already installed.
pub fn try_init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}
