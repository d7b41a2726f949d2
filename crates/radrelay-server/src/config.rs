//! Worker configuration
//!
//! JSON configuration file with serde defaults so a minimal file (or
//! an empty object) yields a working proxy. Validation happens at load
//! time; a worker never starts with a half-usable configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    1812
}

fn default_backend_address() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_port() -> u16 {
    1814
}

fn default_lib_dir() -> PathBuf {
    PathBuf::from("/var/lib/radrelay")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/radrelay")
}

fn default_log_flush_secs() -> u64 {
    10
}

fn default_lifespan_hours() -> i64 {
    12
}

fn default_life_check_hours() -> u64 {
    1
}

fn default_life_hours() -> Vec<u32> {
    vec![22, 23, 0, 1, 2, 3, 4, 5]
}

fn default_connection_monitor() -> MonitorState {
    MonitorState {
        check_secs: 60,
        count: 100_000,
    }
}

fn default_failure_monitor() -> MonitorState {
    MonitorState {
        check_secs: 60,
        count: 100,
    }
}

fn default_quit_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// Periodic gauge monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorState {
    /// Seconds between samples
    pub check_secs: u64,
    /// Terminate once the gauge exceeds this
    pub count: u64,
}

/// Internal lifecycle knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Internals {
    /// Disable the interrupt handler (supervised environments)
    #[serde(default)]
    pub no_interrupt: bool,

    /// Seconds between module log flushes
    #[serde(default = "default_log_flush_secs")]
    pub log_flush_secs: u64,

    /// Hours of uptime before the worker asks to be recycled
    #[serde(default = "default_lifespan_hours")]
    pub lifespan_hours: i64,

    /// Hours between lifespan checks
    #[serde(default = "default_life_check_hours")]
    pub life_check_hours: u64,

    /// Wall-clock hours during which a lifespan restart may happen
    #[serde(default = "default_life_hours")]
    pub life_hours: Vec<u32>,

    /// Connection-table size monitor
    #[serde(default = "default_connection_monitor")]
    pub max_connections: MonitorState,

    /// Client dial-failure monitor
    #[serde(default = "default_failure_monitor")]
    pub client_failures: MonitorState,
}

impl Default for Internals {
    fn default() -> Self {
        Internals {
            no_interrupt: false,
            log_flush_secs: default_log_flush_secs(),
            lifespan_hours: default_lifespan_hours(),
            life_check_hours: default_life_check_hours(),
            life_hours: default_life_hours(),
            max_connections: default_connection_monitor(),
            client_failures: default_failure_monitor(),
        }
    }
}

/// Shutdown behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quit {
    /// Wait for module unload and log flush before exiting
    #[serde(default = "default_true")]
    pub wait: bool,

    /// Ceiling on shutdown work
    #[serde(default = "default_quit_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for Quit {
    fn default() -> Self {
        Quit {
            wait: true,
            timeout_secs: default_quit_timeout_secs(),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Client-facing listen address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Client-facing listen port (1812 auth, typically 1813 for an
    /// accounting instance)
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Backend RADIUS server address
    #[serde(default = "default_backend_address")]
    pub backend_address: String,

    /// Backend RADIUS server port
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,

    /// Run as an accounting sink instead of a proxy
    #[serde(default)]
    pub accounting: bool,

    /// Never synthesize Access-Reject responses
    #[serde(default)]
    pub no_reject: bool,

    /// Directory holding secrets, clients and manifest files
    #[serde(default = "default_lib_dir")]
    pub lib_dir: PathBuf,

    /// Directory module logs are flushed into
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Module names to activate, in registration order
    #[serde(default)]
    pub modules: Vec<String>,

    /// Log level when RUST_LOG is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default)]
    pub internals: Internals,

    #[serde(default)]
    pub quit: Quit,
}

impl Default for Config {
    fn default() -> Self {
        // an empty JSON object deserializes to the same thing
        Config {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            backend_address: default_backend_address(),
            backend_port: default_backend_port(),
            accounting: false,
            no_reject: false,
            lib_dir: default_lib_dir(),
            log_dir: default_log_dir(),
            modules: Vec::new(),
            log_level: None,
            internals: Internals::default(),
            quit: Quit::default(),
        }
    }
}

impl Config {
    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Client-facing bind address
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr: IpAddr = self.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!("Invalid bind address: {}", self.bind_address))
        })?;
        Ok(SocketAddr::new(addr, self.bind_port))
    }

    /// Backend server address
    pub fn backend_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr: IpAddr = self.backend_address.parse().map_err(|_| {
            ConfigError::Invalid(format!("Invalid backend address: {}", self.backend_address))
        })?;
        Ok(SocketAddr::new(addr, self.backend_port))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        self.backend_addr()?;
        if self.bind_port == 0 {
            return Err(ConfigError::Invalid("Bind port cannot be 0".to_string()));
        }
        if self.backend_port == 0 {
            return Err(ConfigError::Invalid("Backend port cannot be 0".to_string()));
        }
        if !self.accounting && self.bind_port == self.backend_port
            && self.bind_address == self.backend_address
        {
            return Err(ConfigError::Invalid(
                "Proxy cannot relay to itself".to_string(),
            ));
        }
        for hour in &self.internals.life_hours {
            if *hour > 23 {
                return Err(ConfigError::Invalid(format!("Invalid hour: {}", hour)));
            }
        }
        if self.internals.life_check_hours == 0 {
            return Err(ConfigError::Invalid(
                "Lifespan check interval cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Example configuration for `--example`
    pub fn example() -> Self {
        Config {
            modules: vec!["whitelist".to_string(), "stats".to_string()],
            ..Config::default()
        }
    }
}
