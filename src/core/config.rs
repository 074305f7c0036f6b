use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Production Omniston WebSocket endpoint
pub const DEFAULT_API_URL: &str = "wss://omni-ws.ston.fi";
/// Sandbox endpoint, useful for integration work
pub const SANDBOX_API_URL: &str = "wss://omni-ws-sandbox.ston.fi";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OmnistonConfig {
    pub api_url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: Option<u64>,
    pub expire_quotes_locally: bool,
}

impl Default for OmnistonConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 10_000,
            request_timeout_ms: None,
            expire_quotes_locally: false,
        }
    }
}

impl OmnistonConfig {
    /// Create a new configuration for the given WebSocket URL
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    /// Configuration pointing at the sandbox endpoint
    #[must_use]
    pub fn sandbox() -> Self {
        Self::new(SANDBOX_API_URL)
    }

    /// Create configuration from environment variables
    ///
    /// Recognised variables (all optional):
    /// - `{PREFIX}_API_URL` (e.g., `OMNISTON_API_URL`)
    /// - `{PREFIX}_MAX_RECONNECT_ATTEMPTS`
    /// - `{PREFIX}_RECONNECT_DELAY_MS`
    /// - `{PREFIX}_CONNECT_TIMEOUT_MS`
    /// - `{PREFIX}_REQUEST_TIMEOUT_MS`
    /// - `{PREFIX}_EXPIRE_QUOTES_LOCALLY`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let var = |name: &str| env::var(format!("{}_{}", prefix, name)).ok();

        let mut config = Self::default();
        if let Some(url) = var("API_URL") {
            config.api_url = url;
        }
        if let Some(value) = var("MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = parse_var(&prefix, "MAX_RECONNECT_ATTEMPTS", &value)?;
        }
        if let Some(value) = var("RECONNECT_DELAY_MS") {
            config.reconnect_delay_ms = parse_var(&prefix, "RECONNECT_DELAY_MS", &value)?;
        }
        if let Some(value) = var("CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = parse_var(&prefix, "CONNECT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = var("REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = Some(parse_var(&prefix, "REQUEST_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = var("EXPIRE_QUOTES_LOCALLY") {
            config.expire_quotes_locally = parse_var(&prefix, "EXPIRE_QUOTES_LOCALLY", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from .env file and environment variables
    ///
    /// This method first loads environment variables from a .env file (if it exists),
    /// then reads the configuration using the standard environment variable names.
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // no file, fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("ws://") || self.api_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidConfiguration(format!(
                "API URL must use ws:// or wss://, got '{}'",
                self.api_url
            )));
        }
        Ok(())
    }

    /// Set maximum reconnection attempts
    #[must_use]
    pub const fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the base reconnection delay
    #[must_use]
    pub const fn reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub const fn connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub const fn request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = Some(timeout_ms);
        self
    }

    /// Emit `NoQuote` when the current quote's trade start deadline passes
    #[must_use]
    pub const fn expire_quotes_locally(mut self, enabled: bool) -> Self {
        self.expire_quotes_locally = enabled;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_var<T: std::str::FromStr>(prefix: &str, name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| {
        ConfigError::InvalidConfiguration(format!(
            "Invalid value '{}' for {}_{}",
            value, prefix, name
        ))
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
