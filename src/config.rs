//! Configuration module for bet-server.
//!
//! Supports command-line arguments, environment variables and a TOML
//! configuration file. CLI arguments (or their environment variables) take
//! precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

use crate::protocol::Framing;

/// Command-line arguments for the bet server
#[derive(Parser, Debug)]
#[command(name = "bet-server")]
#[command(version)]
#[command(about = "Receives length-prefixed bets over TCP and appends them to a CSV file")]
#[command(long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long, env = "SERVER_IP")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SERVER_PORT")]
    pub port: Option<u16>,

    /// Maximum number of pending connections
    #[arg(short = 'b', long, env = "SERVER_LISTEN_BACKLOG")]
    pub listen_backlog: Option<i32>,

    /// Wire framing of the length prefix
    #[arg(long, value_enum)]
    pub framing: Option<Framing>,

    /// Largest accepted payload in bytes
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// CSV file bets are appended to
    #[arg(long, env = "BETS_FILE")]
    pub bets_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOGGING_LEVEL")]
    pub log_level: Option<String>,

    /// Print the winning bets from the bets file and exit
    #[arg(long)]
    pub list_winners: bool,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: i32,
    #[serde(default)]
    pub framing: Framing,
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            listen_backlog: default_listen_backlog(),
            framing: Framing::default(),
            max_payload_size: default_max_payload_size(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// CSV file bets are appended to
    #[serde(default = "default_bets_file")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_bets_file(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_listen_backlog() -> i32 {
    5
}

fn default_max_payload_size() -> usize {
    8 * 1024
}

fn default_bets_file() -> PathBuf {
    PathBuf::from("./bets.csv")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub listen_backlog: i32,
    pub framing: Framing,
    pub max_payload_size: usize,
    pub bets_file: PathBuf,
    pub log_level: String,
    /// Report winners instead of serving
    pub list_winners: bool,
}

impl Config {
    /// Load configuration from the process arguments and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge CLI args over the optional TOML file.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            listen_backlog: cli
                .listen_backlog
                .unwrap_or(toml_config.server.listen_backlog),
            framing: cli.framing.unwrap_or(toml_config.server.framing),
            max_payload_size: cli
                .max_payload_size
                .unwrap_or(toml_config.server.max_payload_size),
            bets_file: cli.bets_file.unwrap_or(toml_config.storage.path),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            list_winners: cli.list_winners,
        };

        if config.listen_backlog < 1 {
            return Err(ConfigError::Invalid("listen_backlog must be at least 1"));
        }
        if config.max_payload_size == 0 {
            return Err(ConfigError::Invalid("max_payload_size must be at least 1"));
        }

        Ok(config)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
