//! Command-line arguments for the hub binary.
//!
//! Every option except the config path overrides a value from the TOML
//! file.

use clap::{Arg, ArgAction, Command, value_parser};
use std::path::PathBuf;

use crate::config::AppConfig;

const DEFAULT_CONFIG_PATH: &str = "shardhub.toml";

/// Parsed command-line options.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for the required game version
    pub game_version: Option<u32>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on bad input.
    pub fn parse() -> Self {
        Self::from_command(command().get_matches())
    }

    fn from_command(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            bind_address: matches.get_one::<String>("bind").cloned(),
            game_version: matches.get_one::<u32>("game-version").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }

    /// Writes the overrides into `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind_address {
            config.hub.bind_address = bind.clone();
        }
        if let Some(version) = self.game_version {
            config.hub.game_version = version;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
    }
}

fn command() -> Command {
    Command::new("shardhub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Control-plane hub for sharded game deployments")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 0.0.0.0:43595)"),
        )
        .arg(
            Arg::new("game-version")
                .short('g')
                .long("game-version")
                .value_name("VERSION")
                .help("Game version shards and consoles must announce")
                .value_parser(value_parser!(u32)),
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
}
