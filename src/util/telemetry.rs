//! Telemetry helpers for structured logging.

use tracing_subscriber::EnvFilter;

/// Install a default env-based subscriber (`RUST_LOG`) if none is set.
///
/// Hosts embedding the scheduler are free to install their own subscriber
/// before constructing it; this helper then does nothing.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Install a subscriber using an explicit filter directive such as
/// `"emissions_scheduler=debug"`, falling back to `info` if it does not parse.
pub fn init_tracing_with_filter(directive: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
