//! Configuration management for lb-adapter.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::ConfigAdapter;
use crate::cli::Args;
use crate::execution::{CommandLineError, CommandSpec};
use crate::rate_limit::{check_rate, InvalidRate, ReloadLimit};

/// Load-balancer command configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbConfig {
    /// Command that validates the configuration on disk.
    pub check_config_command: String,
    /// Command that makes the load balancer pick up new configuration.
    pub reload_config_command: String,
    /// Wall-clock bound for either command, in milliseconds.
    pub command_timeout_ms: u64,
    /// How long a reload may wait for a rate-limit permit, in milliseconds.
    pub max_reload_wait_time_ms: u64,
    /// Reload permits per second. Absent means reloads are not limited.
    pub reload_rate_limit: Option<f64>,
    /// Logging configuration.
    pub logging: LoggingSection,
}

impl Default for LbConfig {
    fn default() -> Self {
        Self {
            check_config_command: "nginx -t".to_string(),
            reload_config_command: "nginx -s reload".to_string(),
            command_timeout_ms: 10_000,
            max_reload_wait_time_ms: 0,
            reload_rate_limit: None,
            logging: LoggingSection::default(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LbConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    ///
    /// Unparseable numeric values are reported rather than ignored.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source (for testing).
    pub fn apply_env_from<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(command) = var("LB_ADAPTER_CHECK_COMMAND") {
            self.check_config_command = command;
        }

        if let Some(command) = var("LB_ADAPTER_RELOAD_COMMAND") {
            self.reload_config_command = command;
        }

        if let Some(value) = var("LB_ADAPTER_COMMAND_TIMEOUT_MS") {
            self.command_timeout_ms = parse_value("LB_ADAPTER_COMMAND_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = var("LB_ADAPTER_MAX_RELOAD_WAIT_MS") {
            self.max_reload_wait_time_ms =
                parse_value("LB_ADAPTER_MAX_RELOAD_WAIT_MS", &value)?;
        }

        if let Some(value) = var("LB_ADAPTER_RELOAD_RATE_LIMIT") {
            self.reload_rate_limit = if value.is_empty() {
                None
            } else {
                Some(parse_value("LB_ADAPTER_RELOAD_RATE_LIMIT", &value)?)
            };
        }

        if let Some(level) = var("LB_ADAPTER_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(ref command) = args.check_command {
            self.check_config_command = command.clone();
        }

        if let Some(ref command) = args.reload_command {
            self.reload_config_command = command.clone();
        }

        if let Some(timeout) = args.timeout_ms {
            self.command_timeout_ms = timeout;
        }

        if let Some(wait) = args.max_wait_ms {
            self.max_reload_wait_time_ms = wait;
        }

        if let Some(rate) = args.rate {
            self.reload_rate_limit = Some(rate);
        }

        if args.no_rate_limit {
            self.reload_rate_limit = None;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => LbConfig::from_file(path)?,
            None => LbConfig::default(),
        };

        config.apply_env()?;
        config.apply_args(args);

        Ok(config)
    }

    /// Command execution timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Maximum time a reload may wait for a permit.
    pub fn max_reload_wait(&self) -> Duration {
        Duration::from_millis(self.max_reload_wait_time_ms)
    }

    /// Parse the check command.
    pub fn check_spec(&self) -> Result<CommandSpec, ConfigError> {
        CommandSpec::parse(&self.check_config_command, self.command_timeout())
            .map_err(|e| ConfigError::InvalidCommand("check_config_command", e))
    }

    /// Parse the reload command.
    pub fn reload_spec(&self) -> Result<CommandSpec, ConfigError> {
        CommandSpec::parse(&self.reload_config_command, self.command_timeout())
            .map_err(|e| ConfigError::InvalidCommand("reload_config_command", e))
    }

    /// Check every value without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_spec()?;
        self.reload_spec()?;
        if let Some(rate) = self.reload_rate_limit {
            check_rate(rate).map_err(ConfigError::InvalidRate)?;
        }
        Ok(())
    }

    /// Build an adapter with its own rate limiter (if one is configured).
    pub fn to_adapter(&self) -> Result<ConfigAdapter, ConfigError> {
        let limit =
            ReloadLimit::from_rate(self.reload_rate_limit).map_err(ConfigError::InvalidRate)?;
        self.to_adapter_with_limit(limit)
    }

    /// Build an adapter gated by an existing, shared limit.
    pub fn to_adapter_with_limit(
        &self,
        limit: ReloadLimit,
    ) -> Result<ConfigAdapter, ConfigError> {
        Ok(ConfigAdapter::new(
            self.check_spec()?,
            self.reload_spec()?,
            self.max_reload_wait(),
            limit,
        ))
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name, value.to_string()))
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// A configured command line could not be used.
    InvalidCommand(&'static str, CommandLineError),
    /// The reload rate is not a positive finite number.
    InvalidRate(InvalidRate),
    /// An override could not be parsed.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidCommand(field, e) => write!(f, "invalid {}: {}", field, e),
            Self::InvalidRate(e) => write!(f, "invalid reload_rate_limit: {}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for {}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
