//! JSON logging via `tracing-subscriber`.

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pick the filter: a non-empty `RUST_LOG` directive first, then `LOG_LEVEL`.
fn build_filter(rust_log: Option<&str>, log_level: &str) -> Result<EnvFilter, ParseError> {
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directive) => EnvFilter::try_new(directive).or_else(|_| EnvFilter::try_new(log_level)),
        None => EnvFilter::try_new(log_level),
    }
}

/// Install the global subscriber. Exits the process if neither directive parses.
pub fn init_logging(log_level: &str) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter_layer = match build_filter(rust_log.as_deref(), log_level) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("FATAL: Failed to create log filter: {e}");
            std::process::exit(1);
        }
    };

    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .init();

    tracing::info!(
        log_level = %log_level,
        rust_log = rust_log.as_deref().unwrap_or(""),
        "Logging initialized"
    );
}
