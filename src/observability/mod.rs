//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - tracing subscriber initialisation for the CLI

pub mod metrics;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `log_level` applies to this crate only.
/// `log_format` is `json` or `text`.
pub fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("azuread_provider={}", log_level.to_lowercase()).into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // try_init so tests and embedders that already set a subscriber keep theirs
    let result = if log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        tracing::debug!("Tracing subscriber already installed: {e}");
    }
}
