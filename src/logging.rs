use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &Config) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_directive().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
