//! Tracing subscriber setup.

use afterglow_core::config::GeneralConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Filter used when neither `RUST_LOG` nor the config names one.
const DEFAULT_FILTER: &str = "afterglow_app=info,afterglow_core=info,afterglow_llm=info,warn";

/// Build the log filter. `RUST_LOG` wins over the configured level.
#[must_use]
pub fn log_filter(config: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber: human-readable by default, JSON lines
/// when `json_logs` is set.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(config: &GeneralConfig) -> bool {
    let filter = log_filter(config);
    let registry = tracing_subscriber::registry();
    let result = if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_filter(filter),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_filter(filter),
            )
            .try_init()
    };
    result.is_ok()
}
