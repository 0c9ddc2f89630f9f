//! Configuration management for the server binary.
//!
//! Settings are read from a TOML file. Every field has a default, so a file
//! only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_bind_address() -> String {
    "0.0.0.0:10000".to_string()
}

fn default_desired_ticks() -> u32 {
    60
}

fn default_plugin_directory() -> String {
    "plugins".to_string()
}

fn default_auto_load() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub plugins: PluginSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to accept sessions on (e.g., "0.0.0.0:10000")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Tick loop iterations per second
    #[serde(default = "default_desired_ticks")]
    pub desired_ticks: u32,
    /// Threads running asynchronous tasks; 0 uses one per CPU
    #[serde(default)]
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Directory holding one subdirectory per plugin
    #[serde(default = "default_plugin_directory")]
    pub directory: String,
    /// Whether to load and enable plugins on startup
    #[serde(default = "default_auto_load")]
    pub auto_load: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            desired_ticks: default_desired_ticks(),
            workers: 0,
        }
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            auto_load: default_auto_load(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("📝 Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration settings.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", self.server.bind_address));
        }

        if self.scheduler.desired_ticks == 0 || self.scheduler.desired_ticks > 1000 {
            return Err(format!(
                "Invalid desired_ticks: {}. Must be between 1 and 1000",
                self.scheduler.desired_ticks
            ));
        }

        if self.plugins.directory.is_empty() {
            return Err("Plugin directory cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                self.logging.level
            ));
        }

        Ok(())
    }
}
