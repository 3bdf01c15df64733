pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod sanitize;
pub mod server;
pub mod signals;
pub mod store;
pub mod tracking;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over the configured level; verbose logging raises the
/// default to debug so request and response bodies are dumped.
///
/// Note: This function can only be called once.
pub fn init_tracing(log_level: &str, log_format: &str, verbose: bool) {
    let default_level = if verbose { "debug" } else { log_level };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);

    match log_format {
        "json" => registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .init(),
        "pretty" => registry.with(fmt::layer().pretty().with_target(true)).init(),
        _ => registry.with(fmt::layer().with_target(true)).init(),
    }
}
