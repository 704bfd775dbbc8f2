use anyhow::Context;
use config::{Config, Environment, File};

use plant_common::DashboardConfig;

const DEFAULT_CONFIG_PATH: &str = "config/dashboard";

/// Reads `config/dashboard.*` (or `$PLANT_CONFIG`) when present, then
/// applies `PLANT_`-prefixed environment overrides such as
/// `PLANT_MQTT__BROKER_HOST`.
pub fn load_config() -> anyhow::Result<DashboardConfig> {
    let path = std::env::var("PLANT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_from(File::with_name(&path).required(false))
}

fn load_from<S>(file: S) -> anyhow::Result<DashboardConfig>
where
    S: config::Source + Send + Sync + 'static,
{
    let settings = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("PLANT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read dashboard configuration")?;

    let mut config: DashboardConfig = settings
        .try_deserialize()
        .context("invalid dashboard configuration")?;
    config.sanitize();
    Ok(config)
}
