use tracing_subscriber::EnvFilter;

use crate::config::TelemetrySettings;

const DEFAULT_FILTER: &str = "info";

/// Initialise the global `tracing` subscriber.
///
/// Logs go to stderr. Respects `RUST_LOG`, falling back to `info`. With `telemetry.json` set,
/// log lines are emitted as JSON objects. Calling this more than once is a
/// no-op.
pub fn init_tracing(settings: &TelemetrySettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if settings.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
