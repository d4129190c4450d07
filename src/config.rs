//! Client configuration.
//!
//! All fields have defaults, so a configuration file only needs to name what
//! it changes:
//!
//! ```
//! use beanstalk_client::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "backoff": { "max_delay_ms": 30000 } }"#).unwrap();
//! assert_eq!(config.backoff.max_delay_ms, 30_000);
//! assert_eq!(config.backoff.initial_delay_ms, 1_000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_LINE_LENGTH};

/// Default first reconnect delay.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;

/// Default reconnect delay ceiling (one hour).
pub const DEFAULT_MAX_DELAY_MS: u64 = 3_600_000;

/// Default delay growth per failed attempt.
pub const DEFAULT_FACTOR: f64 = std::f64::consts::E;

/// Default relative jitter applied to each delay.
pub const DEFAULT_JITTER: f64 = 0.119_626_565_582_117_5;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry, and the floor delays reset to.
    pub initial_delay_ms: u64,
    /// Ceiling for the delay.
    pub max_delay_ms: u64,
    /// Multiplier applied after every failed attempt.
    pub factor: f64,
    /// Relative jitter, 0.0 disables it.
    pub jitter: f64,
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            factor: DEFAULT_FACTOR,
            jitter: DEFAULT_JITTER,
        }
    }
}

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Swallow disconnects instead of publishing them and failing `connect`.
    pub consume_disconnects: bool,
    /// Timeout for a single TCP connect attempt.
    pub connect_timeout_ms: u64,
    /// Longest status line accepted from the broker.
    pub max_line_length: usize,
    /// Largest job or YAML body accepted from the broker. A bigger one
    /// closes the connection.
    pub max_body_size: usize,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl ClientConfig {
    /// Parse a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            consume_disconnects: true,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            backoff: BackoffConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.consume_disconnects);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.backoff.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.backoff.max_delay(), Duration::from_secs(3600));
        assert_eq!(config.max_body_size, 1 << 30);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(ClientConfig::from_json("{}").unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config = ClientConfig::from_json(
            r#"{ "consume_disconnects": false, "backoff": { "jitter": 0.0 } }"#,
        )
        .unwrap();

        assert!(!config.consume_disconnects);
        assert_eq!(config.backoff.jitter, 0.0);
        assert_eq!(config.backoff.factor, DEFAULT_FACTOR);
    }

    #[test]
    fn test_invalid_json() {
        assert!(ClientConfig::from_json("{ not json").is_err());
    }
}
