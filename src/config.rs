//! Configuration module for logrelayd.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values. The supervision
//! mode must come from one of the two; starting without a mode is an error.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Default path of the relay socket.
pub const DEFAULT_SOCKET: &str = "/var/run/logrelayd.sock";

/// Command-line interface for the daemon.
#[derive(Parser, Debug)]
#[command(name = "logrelayd")]
#[command(version = "0.1.0")]
#[command(about = "A supervisory daemon with a framed log relay", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Run the supervisor and relay in the foreground (default)
    Run(RunArgs),
    /// Send one framed message to a running relay
    Send(SendArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Supervision mode, overriding the configuration file
    #[arg(short, long, value_enum)]
    pub mode: Option<Mode>,

    /// Relay socket path, overriding the configuration file
    #[arg(short, long)]
    pub socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            config: None,
            mode: None,
            socket: None,
            log_level: "info".to_string(),
        }
    }
}

/// Arguments for the `send` subcommand.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Relay socket path
    #[arg(short, long, default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    /// Severity code (syslog-style: 0 emergency .. 7 debug)
    #[arg(long, default_value_t = 6)]
    pub severity: u32,

    /// Message text
    pub message: String,
}

/// Supervision mode: which programs the daemon launches and stops.
///
/// `netserver` is accepted as a spelling of `standalone`; the two have
/// always selected the same program set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Supervise nothing; only the relay runs.
    None,
    /// Launch the full program set: driver control, state server, monitor.
    #[serde(alias = "netserver")]
    #[value(alias = "netserver")]
    Standalone,
    /// Launch only the monitor.
    #[value(name = "netclient")]
    NetClient,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub programs: ProgramsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Supervision-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct SupervisorConfig {
    /// Supervision mode; required here or on the command line.
    pub mode: Option<Mode>,
}

/// Paths of the supervised programs. Unset programs are skipped with a
/// warning when their mode would launch them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProgramsConfig {
    /// Control command for the device drivers; invoked with `start`/`stop`
    /// and expected to exit promptly.
    pub driver_control: Option<PathBuf>,
    /// The long-running state server.
    pub state_server: Option<PathBuf>,
    /// The long-running monitor.
    pub monitor: Option<PathBuf>,
}

/// Relay-related configuration
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    /// Filesystem path of the listening socket
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    /// Upper bound on concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Receive buffer capacity per connection, in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
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

fn default_socket() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET)
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_frame_size() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub programs: ProgramsConfig,
    pub socket: PathBuf,
    pub max_connections: usize,
    pub max_frame_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from `run` arguments and the optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load(args: RunArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = args.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(args, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    fn resolve(args: RunArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let mode = args
            .mode
            .or(toml_config.supervisor.mode)
            .ok_or(ConfigError::MissingMode)?;

        Ok(Config {
            mode,
            programs: toml_config.programs,
            socket: args.socket.unwrap_or(toml_config.relay.socket),
            max_connections: toml_config.relay.max_connections,
            max_frame_size: toml_config.relay.max_frame_size,
            log_level: if args.log_level != "info" {
                args.log_level
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
    MissingMode,
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
            ConfigError::MissingMode => {
                write!(
                    f,
                    "No supervision mode configured (set [supervisor] mode or pass --mode)"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}
