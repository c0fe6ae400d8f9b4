//! Global tracing subscriber.

use tether_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `settings.level`.
/// A no-op if a subscriber is already installed.
pub fn init_subscriber(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = if settings.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
