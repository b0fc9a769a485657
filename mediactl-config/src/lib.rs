//! Configuration management for the media worker control client

use serde::Deserialize;
use thiserror::Error;

/// Largest frame payload the worker accepts (4 MiB); the 4-byte length
/// prefix is not counted
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4_194_304;

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "MEDIACTL";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Control channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Maximum size of a single frame, in bytes
    pub max_message_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Console,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub channel: ChannelConfig,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            log_level: Some("info".to_string()),
            log_format: LogFormat::Json,
        }
    }
}

impl AppConfig {
    /// Load configuration from `.env` and `MEDIACTL_*` environment variables
    ///
    /// Nested keys use a double underscore, e.g.
    /// `MEDIACTL_CHANNEL__MAX_MESSAGE_SIZE=1048576`.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_env_with_prefix(ENV_PREFIX)
    }

    /// Load configuration from environment variables with a custom prefix
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("log_level", "info")?
            .set_default("log_format", "json")?
            .set_default("channel.max_message_size", DEFAULT_MAX_MESSAGE_SIZE as u64)?
            .add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.max_message_size < 16 {
            return Err(ConfigError::Invalid(format!(
                "channel.max_message_size too small: {}",
                self.channel.max_message_size
            )));
        }
        Ok(())
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}
