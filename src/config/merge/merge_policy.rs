//! Built-in defaults seeded as the lowest-precedence layer.

use crate::config::CanopyConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat};

/// Start a builder whose first layer is the serialized default config.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = toml::to_string(&CanopyConfig::default())
        .map_err(|e| ConfigError::Message(format!("Failed to serialize defaults: {}", e)))?;
    Ok(Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml)))
}
