//! Configuration module for friend-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::storage::Limits;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "friend-server")]
#[command(author = "friend-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-protocol social graph server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:59211)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog for pending connections
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Maximum number of simultaneous sessions
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Receive buffer size per session in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Maximum number of friends per user
    #[arg(long)]
    pub max_friends: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Maximum simultaneous sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events handled per poll wakeup
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
        }
    }
}

/// Wire protocol configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Receive buffer size per session
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Maximum tokens in a command line
    #[serde(default = "default_max_args")]
    pub max_args: usize,
    /// Outbound bytes a session may have queued before it is dropped
    #[serde(default = "default_max_pending_output")]
    pub max_pending_output: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_args: default_max_args(),
            max_pending_output: default_max_pending_output(),
        }
    }
}

/// Social graph limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Names must be shorter than this
    #[serde(default = "default_max_name")]
    pub max_name: usize,
    /// Friends per user
    #[serde(default = "default_max_friends")]
    pub max_friends: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_name: default_max_name(),
            max_friends: default_max_friends(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_listen() -> String {
    "0.0.0.0:59211".to_string()
}

fn default_backlog() -> i32 {
    5
}

fn default_max_connections() -> usize {
    1024
}

fn default_events_capacity() -> usize {
    256
}

fn default_buffer_size() -> usize {
    256
}

fn default_max_args() -> usize {
    12
}

fn default_max_pending_output() -> usize {
    1024 * 1024 // 1 MB
}

fn default_max_name() -> usize {
    32
}

fn default_max_friends() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: String,
    pub backlog: i32,
    pub max_connections: usize,
    pub events_capacity: usize,
    pub buffer_size: usize,
    pub max_args: usize,
    pub max_pending_output: usize,
    pub max_name: usize,
    pub max_friends: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::empty(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            events_capacity: toml_config.server.events_capacity,
            buffer_size: cli.buffer_size.unwrap_or(toml_config.protocol.buffer_size),
            max_args: toml_config.protocol.max_args,
            max_pending_output: toml_config.protocol.max_pending_output,
            max_name: toml_config.limits.max_name,
            max_friends: cli.max_friends.unwrap_or(toml_config.limits.max_friends),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size < 3 {
            return Err(ConfigError::Invalid("buffer_size must be at least 3"));
        }
        if self.max_name < 2 {
            return Err(ConfigError::Invalid("max_name must be at least 2"));
        }
        if self.max_friends == 0 {
            return Err(ConfigError::Invalid("max_friends must be positive"));
        }
        if self.max_args == 0 {
            return Err(ConfigError::Invalid("max_args must be positive"));
        }
        if self.max_connections == 0 || self.events_capacity == 0 {
            return Err(ConfigError::Invalid(
                "max_connections and events_capacity must be positive",
            ));
        }
        Ok(())
    }

    /// Store limits derived from this configuration.
    pub fn limits(&self) -> Limits {
        Limits {
            max_name: self.max_name,
            max_friends: self.max_friends,
        }
    }
}

impl CliArgs {
    fn empty() -> Self {
        Self {
            config: None,
            listen: None,
            backlog: None,
            max_connections: None,
            buffer_size: None,
            max_friends: None,
            log_level: None,
        }
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
