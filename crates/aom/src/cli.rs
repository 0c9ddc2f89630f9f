//! Command-line interface of the server binary.

use aom_plugin_system::PluginSafetyConfig;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Command line options. Everything except the flags overrides the matching
/// configuration file setting when present.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for plugin directory
    pub plugin_dir: Option<PathBuf>,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Whether to allow plugins built with a different Rust compiler (DANGEROUS)
    pub danger_allow_unsafe_plugins: bool,
    /// Whether to allow plugins built against a different engine version (DANGEROUS)
    pub danger_allow_abi_mismatch: bool,
    /// Whether to require exact version matching including patch digits
    pub strict_versioning: bool,
}

impl CliArgs {
    pub fn command() -> Command {
        Command::new("aom")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Pluggable game server engine")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("plugins")
                    .short('p')
                    .long("plugins")
                    .value_name("DIR")
                    .help("Plugin directory path"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Bind address (e.g., 0.0.0.0:10000)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("danger-allow-unsafe-plugins")
                    .long("danger-allow-unsafe-plugins")
                    .help("Allow plugins compiled with a different Rust compiler (MAY CAUSE CRASHES)")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("danger-allow-abi-mismatch")
                    .long("danger-allow-abi-mismatch")
                    .help("Allow plugins built against a different engine version (MAY CAUSE UNDEFINED BEHAVIOR)")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("strict-versioning")
                    .long("strict-versioning")
                    .help("Require exact engine version matching including patch digits")
                    .action(ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            plugin_dir: matches.get_one::<String>("plugins").map(PathBuf::from),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            danger_allow_unsafe_plugins: matches.get_flag("danger-allow-unsafe-plugins"),
            danger_allow_abi_mismatch: matches.get_flag("danger-allow-abi-mismatch"),
            strict_versioning: matches.get_flag("strict-versioning"),
        }
    }

    pub fn to_plugin_safety_config(&self) -> PluginSafetyConfig {
        PluginSafetyConfig {
            allow_unsafe_plugins: self.danger_allow_unsafe_plugins,
            allow_abi_mismatch: self.danger_allow_abi_mismatch,
            strict_versioning: self.strict_versioning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let matches = CliArgs::command().try_get_matches_from(args).unwrap();
        CliArgs::from_matches(&matches)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["aom"]);
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert!(args.plugin_dir.is_none());
        assert!(args.bind_address.is_none());
        assert!(!args.json_logs);

        let safety = args.to_plugin_safety_config();
        assert!(!safety.allow_unsafe_plugins);
        assert!(!safety.allow_abi_mismatch);
        assert!(!safety.strict_versioning);
    }

    #[test]
    fn test_overrides_and_flags() {
        let args = parse(&[
            "aom",
            "--config",
            "prod.toml",
            "-p",
            "/opt/aom/plugins",
            "--bind",
            "127.0.0.1:4000",
            "--log-level",
            "debug",
            "--json-logs",
            "--strict-versioning",
            "--danger-allow-abi-mismatch",
        ]);

        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.plugin_dir, Some(PathBuf::from("/opt/aom/plugins")));
        assert_eq!(args.bind_address.as_deref(), Some("127.0.0.1:4000"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);

        let safety = args.to_plugin_safety_config();
        assert!(safety.strict_versioning);
        assert!(safety.allow_abi_mismatch);
        assert!(!safety.allow_unsafe_plugins);
    }
}
