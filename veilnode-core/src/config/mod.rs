//! Configuration management for VeilNode
//!
//! This module provides file and environment based configuration with
//! defaults and validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session lifecycle configuration
    pub session: SessionConfig,

    /// Ephemeral message configuration
    pub messages: MessageConfig,

    /// Credential hashing configuration
    pub crypto: CryptoConfig,

    /// Environment integrity configuration
    pub integrity: IntegrityConfig,

    /// Device-local storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often the integrity auditor samples the environment
    #[serde(with = "humantime_serde")]
    pub audit_interval: Duration,

    /// How often the inactivity clock is checked
    #[serde(with = "humantime_serde")]
    pub inactivity_poll_interval: Duration,

    /// Inactivity timeout assigned to newly registered identities (minutes)
    pub default_timeout_minutes: u32,

    /// Lock the session as soon as the window loses focus
    pub lock_on_focus_loss: bool,
}

/// Ephemeral message configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Burn timer assigned to newly registered identities (seconds)
    pub default_expiration_seconds: u32,

    /// Upper bound accepted for a per-identity burn timer (seconds)
    pub max_expiration_seconds: u32,

    /// Number of cover suggestions requested from the decoy provider
    pub cover_suggestions: usize,
}

/// Argon2id cost parameters for credential hashing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Number of passes
    pub argon2_iterations: u32,

    /// Degree of parallelism
    pub argon2_parallelism: u32,
}

/// Environment integrity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Outer/inner window delta (pixels) treated as a docked debugger
    pub debugger_threshold_px: u32,

    /// Treat debugger suspicion as an integrity failure
    pub debugger_fails_integrity: bool,
}

/// Device-local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the device fingerprint and local key cache
    pub data_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audit_interval: Duration::from_secs(5),
            inactivity_poll_interval: Duration::from_secs(10),
            default_timeout_minutes: 5,
            lock_on_focus_loss: true,
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            default_expiration_seconds: 15,
            max_expiration_seconds: 7 * 24 * 60 * 60,
            cover_suggestions: 4,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        // argon2 crate defaults (OWASP minimum for Argon2id)
        Self {
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            debugger_threshold_px: 180,
            debugger_fails_integrity: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./veilnode-data"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

fn parse_env<T>(name: &str, what: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", what, e))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: VEILNODE_<SECTION>_<KEY>
    /// Example: VEILNODE_SESSION_AUDIT_INTERVAL=5s
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `VEILNODE_*` environment variables onto this config.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Session config
        if let Ok(raw) = env::var("VEILNODE_SESSION_AUDIT_INTERVAL") {
            self.session.audit_interval = humantime_serde::re::humantime::parse_duration(&raw)
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid audit interval: {}", e)))?;
        }
        if let Ok(raw) = env::var("VEILNODE_SESSION_INACTIVITY_POLL_INTERVAL") {
            self.session.inactivity_poll_interval =
                humantime_serde::re::humantime::parse_duration(&raw).map_err(|e| {
                    ConfigError::InvalidValue(format!("Invalid inactivity poll interval: {}", e))
                })?;
        }
        if let Some(minutes) = parse_env("VEILNODE_SESSION_TIMEOUT_MINUTES", "session timeout")? {
            self.session.default_timeout_minutes = minutes;
        }
        if let Some(flag) = parse_env("VEILNODE_SESSION_LOCK_ON_FOCUS_LOSS", "focus-loss flag")? {
            self.session.lock_on_focus_loss = flag;
        }

        // Message config
        if let Some(secs) =
            parse_env("VEILNODE_MESSAGES_EXPIRATION_SECONDS", "message expiration")?
        {
            self.messages.default_expiration_seconds = secs;
        }

        // Crypto config
        if let Some(kib) = parse_env("VEILNODE_CRYPTO_ARGON2_MEMORY_KIB", "argon2 memory")? {
            self.crypto.argon2_memory_kib = kib;
        }
        if let Some(iters) = parse_env("VEILNODE_CRYPTO_ARGON2_ITERATIONS", "argon2 iterations")? {
            self.crypto.argon2_iterations = iters;
        }

        // Integrity config
        if let Some(px) = parse_env("VEILNODE_INTEGRITY_DEBUGGER_THRESHOLD_PX", "debugger threshold")? {
            self.integrity.debugger_threshold_px = px;
        }

        // Storage config
        if let Ok(data_dir) = env::var("VEILNODE_STORAGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        // Logging config
        if let Ok(level) = env::var("VEILNODE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("VEILNODE_LOG_JSON", "JSON flag")? {
            self.logging.json_format = json;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.audit_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "audit_interval must be greater than 0".to_string(),
            ));
        }

        if self.session.inactivity_poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "inactivity_poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.session.default_timeout_minutes == 0 {
            return Err(ConfigError::ValidationFailed(
                "default_timeout_minutes must be greater than 0".to_string(),
            ));
        }

        if self.messages.default_expiration_seconds == 0
            || self.messages.default_expiration_seconds > self.messages.max_expiration_seconds
        {
            return Err(ConfigError::ValidationFailed(format!(
                "default_expiration_seconds must be in 1..={}",
                self.messages.max_expiration_seconds
            )));
        }

        if self.crypto.argon2_iterations == 0 || self.crypto.argon2_parallelism == 0 {
            return Err(ConfigError::ValidationFailed(
                "argon2 iterations and parallelism must be greater than 0".to_string(),
            ));
        }

        // Argon2 requires at least 8 KiB per lane
        if self.crypto.argon2_memory_kib < 8 * self.crypto.argon2_parallelism {
            return Err(ConfigError::ValidationFailed(format!(
                "argon2_memory_kib must be at least {}",
                8 * self.crypto.argon2_parallelism
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
