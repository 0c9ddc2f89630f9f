//! # AoM Engine Server
//!
//! Boots the engine core: tick scheduler, event bus, TCP session manager and
//! plugin manager, configured from a TOML file and the command line.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! aom
//!
//! # Specify custom configuration
//! aom --config production.toml
//!
//! # Override specific settings
//! aom --bind 0.0.0.0:10000 --plugins /opt/aom/plugins --log-level debug
//!
//! # JSON logging for production
//! aom --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM shut the engine down gracefully: plugins are disabled and
//! unloaded, sessions are disconnected, then the tick loop stops. A second
//! signal exits immediately.

use tracing::{error, info};

pub mod app;
pub mod cli;
pub mod config;
pub mod demo;
pub mod logging;
pub mod signals;

pub use app::Engine;
pub use cli::CliArgs;
pub use config::{AppConfig, LoggingSettings, PluginSettings, SchedulerSettings, ServerSettings};

/// Runs the server binary: parse the command line, load and merge the
/// configuration, set up logging and run the [`Engine`] until a shutdown
/// signal.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = match AppConfig::load_from_file(&args.config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load {}: {e}", args.config_path.display());
            std::process::exit(1);
        }
    };
    apply_overrides(&mut config, &args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }
    info!("✅ Configuration loaded from {}", args.config_path.display());

    if let Err(e) = config.validate() {
        error!("❌ Configuration validation failed: {e}");
        std::process::exit(1);
    }

    let engine = match Engine::new(config, args.to_plugin_safety_config()) {
        Ok(engine) => engine,
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    };
    if let Err(e) = engine.run().await {
        error!("❌ Application error: {e:?}");
        std::process::exit(1);
    }

    Ok(())
}

/// Command line values take precedence over the configuration file.
pub fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(plugin_dir) = &args.plugin_dir {
        config.plugins.directory = plugin_dir.to_string_lossy().to_string();
    }
    if let Some(bind_address) = &args.bind_address {
        config.server.bind_address = bind_address.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
}
