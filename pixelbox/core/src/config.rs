//! TOML Configuration File Support
//!
//! Client configuration, loaded from `~/.config/pixelbox/client.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [device]
//! url = "http://192.168.4.1"
//! request_timeout_ms = 5000
//!
//! [sync]
//! poll_interval_ms = 10000
//! event_buffer = 64
//! ```
//!
//! # Environment Variables
//!
//! - `PIXELBOX_DEVICE_URL`
//! - `PIXELBOX_REQUEST_TIMEOUT_MS`
//! - `PIXELBOX_POLL_INTERVAL_MS`

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DEFAULT_REQUEST_TIMEOUT;

/// Default device address (the firmware's access-point IP)
pub const DEFAULT_DEVICE_URL: &str = "http://192.168.4.1/";

/// Default period of the reconciliation timer
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10_000);

/// Default event channel capacity
pub const DEFAULT_EVENT_BUFFER: usize = 64;

const ENV_DEVICE_URL: &str = "PIXELBOX_DEVICE_URL";
const ENV_REQUEST_TIMEOUT: &str = "PIXELBOX_REQUEST_TIMEOUT_MS";
const ENV_POLL_INTERVAL: &str = "PIXELBOX_POLL_INTERVAL_MS";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where the winning configuration values came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[device]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceToml {
    /// Device base URL
    pub url: Option<String>,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// `[sync]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncToml {
    /// Reconciliation period in milliseconds
    pub poll_interval_ms: Option<u64>,
    /// Event channel capacity
    pub event_buffer: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Device section
    pub device: DeviceToml,
    /// Sync section
    pub sync: SyncToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Device base URL
    pub device_url: Url,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Period of the reconciliation timer
    pub poll_interval: Duration,
    /// Capacity of the event channel
    pub event_buffer: usize,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_url: default_device_url(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

#[allow(clippy::expect_used)]
fn default_device_url() -> Url {
    // Compile-time constant; covered by test_default_config
    Url::parse(DEFAULT_DEVICE_URL).expect("default device URL is valid")
}

impl ClientConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults pointing at `device_url`
    #[must_use]
    pub fn for_device(device_url: Url) -> Self {
        Self {
            device_url,
            ..Self::default()
        }
    }

    /// Primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.device_url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "device URL must be http or https, got {}",
                self.device_url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request timeout must be non-zero".to_string(),
            ));
        }
        if self.request_timeout >= self.poll_interval {
            return Err(ConfigError::ValidationError(format!(
                "request timeout ({} ms) must be shorter than the poll interval ({} ms)",
                self.request_timeout.as_millis(),
                self.poll_interval.as_millis()
            )));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event buffer must hold at least one event".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/pixelbox/client.toml` or
/// `~/.config/pixelbox/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pixelbox").join("client.toml"))
}

/// Load configuration from the default file and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// resulting configuration is invalid. A missing file is not an error.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific file and the environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the resulting
/// configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `env` to look up environment variables
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let config = merge_layers(path, env)?;
    config.validate()?;
    Ok(config)
}

/// Load file and environment layers, then apply CLI `overrides` on top
///
/// Validation runs once on the fully merged result, so an override can repair
/// a combination that the file or environment alone would make invalid.
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_overrides<F>(
    path: Option<PathBuf>,
    env: F,
    overrides: &ConfigOverrides,
) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = merge_layers(path, env)?;
    overrides.apply(&mut config)?;
    Ok(config)
}

/// Defaults, then the file, then the environment; not yet validated
fn merge_layers<F>(path: Option<PathBuf>, env: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    Ok(config)
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::ValidationError(format!("bad device URL {raw:?}: {e}")))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) -> Result<(), ConfigError> {
    if let Some(ref url) = toml.device.url {
        config.device_url = parse_url(url)?;
    }
    if let Some(ms) = toml.device.request_timeout_ms {
        config.request_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.sync.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(buffer) = toml.sync.event_buffer {
        config.event_buffer = buffer;
    }
    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ClientConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = env(ENV_DEVICE_URL) {
        match parse_url(&raw) {
            Ok(url) => {
                config.device_url = url;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(var = ENV_DEVICE_URL, error = %e, "Ignoring environment override"),
        }
    }
    if let Some(raw) = env(ENV_REQUEST_TIMEOUT) {
        match raw.parse::<u64>() {
            Ok(ms) => {
                config.request_timeout = Duration::from_millis(ms);
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(var = ENV_REQUEST_TIMEOUT, error = %e, "Ignoring environment override"),
        }
    }
    if let Some(raw) = env(ENV_POLL_INTERVAL) {
        match raw.parse::<u64>() {
            Ok(ms) => {
                config.poll_interval = Duration::from_millis(ms);
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(var = ENV_POLL_INTERVAL, error = %e, "Ignoring environment override"),
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Pass to [`load_config_with_overrides`] so validation sees the merged result.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Device URL override
    pub device_url: Option<Url>,
    /// Request timeout override (milliseconds)
    pub request_timeout_ms: Option<u64>,
    /// Poll interval override (milliseconds)
    pub poll_interval_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set device URL override
    #[must_use]
    pub fn with_device_url(mut self, url: Url) -> Self {
        self.device_url = Some(url);
        self
    }

    /// Set request timeout override
    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// Set poll interval override
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    /// Apply overrides and re-validate
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the result is invalid.
    pub fn apply(&self, config: &mut ClientConfig) -> Result<(), ConfigError> {
        if self.device_url.is_some()
            || self.request_timeout_ms.is_some()
            || self.poll_interval_ms.is_some()
        {
            config.source = ConfigSource::Cli;
        }
        if let Some(ref url) = self.device_url {
            config.device_url = url.clone();
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
