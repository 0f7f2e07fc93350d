use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};

use crate::config::AppConfig;

/// Default location of the TOML configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/Strikebot.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging the TOML file with `STRIKEBOT_`-prefixed
    /// environment variables (`__` separates nested keys), then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the configuration is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let figment = if path.extension().is_some_and(|ext| ext == "json") {
            Figment::new().merge(Json::file(path))
        } else {
            Figment::new().merge(Toml::file(path))
        };
        let config: AppConfig = figment
            .merge(Env::prefixed("STRIKEBOT_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Parses configuration from a TOML string without touching the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or the configuration is invalid.
    pub fn from_toml_str(toml: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .context("Failed to parse configuration")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
