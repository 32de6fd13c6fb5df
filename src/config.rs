//! Configuration module for filedrop.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "filedrop")]
#[command(author = "filedrop authors")]
#[command(version = "0.1.0")]
#[command(about = "Single-file TCP transfer server and load generator", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Receive files and store them in a folder
    Serve(ServeArgs),
    /// Send generated files to a receiver
    Send(SendArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    pub port: Option<u16>,

    /// Folder received files are written to
    pub folder: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Receiver address (e.g., 127.0.0.1:1110)
    pub address: Option<String>,

    /// Transfers per worker
    pub times: Option<usize>,

    /// Number of concurrent workers
    pub workers: Option<usize>,

    /// Stop a worker at its first failed transfer and exit with an error
    #[arg(long)]
    pub fail_fast: bool,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub sender: SenderSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Receiver configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Folder for received files
    #[serde(default = "default_folder")]
    pub folder: PathBuf,
    /// Delay after a failed accept in milliseconds
    #[serde(default = "default_accept_backoff_ms")]
    pub accept_backoff_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            folder: default_folder(),
            accept_backoff_ms: default_accept_backoff_ms(),
        }
    }
}

/// Load generator configuration
#[derive(Debug, Deserialize)]
pub struct SenderSection {
    /// Receiver address
    pub address: Option<String>,
    /// Transfers per worker
    #[serde(default = "default_count")]
    pub times: usize,
    /// Number of concurrent workers
    #[serde(default = "default_count")]
    pub workers: usize,
    /// Stop workers at their first failure
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for SenderSection {
    fn default() -> Self {
        Self {
            address: None,
            times: default_count(),
            workers: default_count(),
            fail_fast: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
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
    1110
}

fn default_folder() -> PathBuf {
    PathBuf::from("./data")
}

fn default_accept_backoff_ms() -> u64 {
    100
}

fn default_count() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved receiver settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub folder: PathBuf,
    pub accept_backoff: Duration,
}

/// Resolved load generator settings
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub address: String,
    pub times: usize,
    pub workers: usize,
    pub fail_fast: bool,
}

/// What the process was asked to do
#[derive(Debug, Clone)]
pub enum Mode {
    Serve(ServerConfig),
    Send(SenderConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let mode = match cli.command {
            Command::Serve(args) => {
                let server = toml_config.server;
                Mode::Serve(ServerConfig {
                    host: args.host.unwrap_or(server.host),
                    port: args.port.unwrap_or(server.port),
                    folder: args.folder.unwrap_or(server.folder),
                    accept_backoff: Duration::from_millis(server.accept_backoff_ms),
                })
            }
            Command::Send(args) => {
                let sender = toml_config.sender;
                let address = args
                    .address
                    .or(sender.address)
                    .ok_or(ConfigError::MissingAddress)?;
                let times = args.times.unwrap_or(sender.times);
                let workers = args.workers.unwrap_or(sender.workers);
                if times == 0 {
                    return Err(ConfigError::InvalidCount("times"));
                }
                if workers == 0 {
                    return Err(ConfigError::InvalidCount("workers"));
                }
                Mode::Send(SenderConfig {
                    address,
                    times,
                    workers,
                    fail_fast: args.fail_fast || sender.fail_fast,
                })
            }
        };

        Ok(Config {
            mode,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingAddress,
    InvalidCount(&'static str),
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
            ConfigError::MissingAddress => write!(f, "No receiver address given"),
            ConfigError::InvalidCount(field) => write!(f, "'{}' must be at least 1", field),
        }
    }
}

impl std::error::Error for ConfigError {}
