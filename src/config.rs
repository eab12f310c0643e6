//! Configuration System using Figment
//!
//! Strongly-typed settings for connection defaults and logging.
//! Configuration is loaded from:
//! 1. `lab_assistant.toml` in the working directory (optional)
//! 2. An explicit file passed to [`Settings::load_from`] (optional)
//! 3. Environment variables (prefixed with `LABASSIST_`, `__` separates sections)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! LABASSIST_APPLICATION__LOG_LEVEL=debug
//! LABASSIST_CONNECTION__AUTO_SIMULATE=true
//! LABASSIST_CONNECTION__TIMEOUT_MS=5000
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lab_assistant::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Log level: {}", settings.application.log_level);
//! # Ok::<(), lab_assistant::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default configuration file name searched in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "lab_assistant.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Configuration serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::LoadError(Box::new(err))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Defaults applied to every connection built by the setup entry points
    #[serde(default)]
    pub connection: ConnectionSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Connection defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Read/write timeout for ordinary commands
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Timeout for each identification query
    #[serde(default = "default_id_timeout_ms")]
    pub id_timeout_ms: u64,
    /// Tries per identification command when the answer is too short
    #[serde(default = "default_id_attempts")]
    pub id_attempts: u32,
    /// Bound on the operation-complete barrier
    #[serde(default = "default_opc_timeout_ms")]
    pub opc_timeout_ms: u64,
    /// Fall back to a simulated link when the transport cannot be opened
    #[serde(default)]
    pub auto_simulate: bool,
    /// Log every exchange at INFO
    #[serde(default)]
    pub debug: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            id_timeout_ms: default_id_timeout_ms(),
            id_attempts: default_id_attempts(),
            opc_timeout_ms: default_opc_timeout_ms(),
            auto_simulate: false,
            debug: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_id_timeout_ms() -> u64 {
    1500
}

fn default_id_attempts() -> u32 {
    2
}

fn default_opc_timeout_ms() -> u64 {
    10_000
}

impl Settings {
    /// Load from `lab_assistant.toml` (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment(None).extract::<Settings>()?.validated()
    }

    /// Load with an explicit file layered over the default file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::figment(Some(path.as_ref()))
            .extract::<Settings>()?
            .validated()
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("LABASSIST_").split("__"))
    }

    /// Render as TOML, e.g. to write a starting `lab_assistant.toml`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conn = &self.connection;
        if conn.timeout_ms == 0 || conn.id_timeout_ms == 0 || conn.opc_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connection timeouts must be greater than zero".into(),
            ));
        }
        if conn.id_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "connection.id_attempts must be at least 1".into(),
            ));
        }
        if !matches!(self.application.log_format.as_str(), "text" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "unknown log format '{}'",
                self.application.log_format
            )));
        }
        match self.application.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}
