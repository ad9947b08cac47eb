use crate::config::AppConfig;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. Call once, before the first session
/// is built.
pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.trim())
        .or_else(|_| EnvFilter::try_new("info"))?;

    let builder = fmt().with_env_filter(filter).with_target(false);
    if config.is_production() {
        builder
            .json()
            .try_init()
            .map_err(|err| anyhow::anyhow!("tracing init failed: {err}"))?;
    } else {
        builder
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("tracing init failed: {err}"))?;
    }

    Ok(())
}
