//! Tracing setup.
//!
//! Logs go to stderr so command output on stdout stays clean and
//! scriptable. The filter honors `RUST_LOG`, falling back to the given
//! default (e.g. `cardstock=info`). Setting `CARDSTOCK_LOG_FORMAT=json`
//! switches to JSON events for machine consumption.

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

/// Initialize stderr logging. Call once at process start.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let json = std::env::var("CARDSTOCK_LOG_FORMAT").is_ok_and(|v| v == "json");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init();
    }
}
