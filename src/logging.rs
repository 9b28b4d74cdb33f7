//! Global tracing subscriber setup

use config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;

/// Noisy dependencies are capped at `warn` unless `RUST_LOG` says otherwise
pub(crate) fn default_directives(level: &str) -> String {
    format!("{level},sqlx=warn,hyper=warn,hyper_util=warn,reqwest=warn,redis=warn")
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)))
}

/// Install the process-wide subscriber; fails if one is already installed
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(filter(config));

    if config.json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_ansi(config.color).with_target(true))
            .try_init()
    }
}
