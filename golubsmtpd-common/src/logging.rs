//! Logger initialisation.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialise the global tracing subscriber from the `[logging]` section.
///
/// `RUST_LOG` overrides the configured level when set. Calling this twice is
/// harmless; the second call is ignored.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    // Already-set subscribers happen in tests spinning up several components.
    drop(result);
}
