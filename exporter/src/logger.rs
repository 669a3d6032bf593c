//! Structured logging: one JSON object per line on standard output,
//! event fields flattened to the top level.

use tracing_subscriber::EnvFilter;

/// Initialize the subscriber with the configured level. An
/// unparseable level falls back to `info`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_target(false)
        .with_env_filter(filter)
        .init();
}
