use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ControlConfig;

/// Load a route file using the config crate.
/// Supports YAML, JSON and TOML, chosen by extension (YAML otherwise).
pub async fn load_config(config_path: &str) -> Result<ControlConfig> {
    load_config_sync(config_path)
}

/// Load a route file synchronously
pub fn load_config_sync(config_path: &str) -> Result<ControlConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let control_config: ControlConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(control_config)
}
