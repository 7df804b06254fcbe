use crate::config::AppConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// RUST_LOG, when set, overrides the configured level
pub fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let layer = fmt::layer()
            .json()
            .with_target(true) // keep target for structured queries
            .with_ansi(false);
        registry.with(layer).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()?;
    }

    Ok(())
}
