//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Runtime configuration.
//!
//! [`RuntimeConfig`] groups the tunables of every component into sections
//! that the component builders consume directly. Every field has a default,
//! so a partial JSON document is enough:
//!
//! ```rust
//! use brokerpc::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_json(r#"{
//!     "server": { "worker_count": 4 },
//!     "stomp": { "topic_prefix": "prod.", "use_queue": true }
//! }"#).unwrap();
//!
//! assert_eq!(config.server.worker_count, 4);
//! assert_eq!(config.server.queue_length, 64);
//! assert_eq!(config.stomp.topic_prefix, "prod.");
//! assert_eq!(config.monitor.max_attempts, 60);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid configuration for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Broker server worker pool
    pub server: ServerConfig,
    /// HTTP transport limits
    pub http: HttpConfig,
    /// Reconnect monitor backoff
    pub monitor: MonitorConfig,
    /// STOMP publisher and subscriber
    pub stomp: StompConfig,
}

impl RuntimeConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] when [`validate`](Self::validate) fails.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.monitor.validate()
    }
}

/// Broker server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of worker tasks.
    ///
    /// Default: 1
    pub worker_count: usize,

    /// Capacity of the work queue shared by the workers.
    ///
    /// Default: 64
    pub queue_length: usize,

    /// Time a request may sit in the queue before a lag warning is logged.
    ///
    /// Default: 5000 ms
    pub high_watermark_ms: u64,

    /// Largest response the server will publish.
    ///
    /// Default: 1 MiB
    pub max_response_size: usize,
}

impl ServerConfig {
    /// Returns the high watermark as a duration.
    pub fn high_watermark(&self) -> Duration {
        Duration::from_millis(self.high_watermark_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::invalid(
                "server.worker_count",
                "at least one worker is required",
            ));
        }
        if self.queue_length == 0 {
            return Err(ConfigError::invalid(
                "server.queue_length",
                "queue length must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            queue_length: 64,
            high_watermark_ms: 5_000,
            max_response_size: 1024 * 1024,
        }
    }
}

/// HTTP transport limits. `0` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Largest request payload
    pub request_size_limit: usize,
    /// Largest reply payload, advertised to the server
    pub response_size_limit: usize,
}

/// Reconnect monitor backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Reopen attempts before giving up.
    ///
    /// Default: 60
    pub max_attempts: u32,

    /// Wait before the first reopen attempt.
    ///
    /// Default: 2000 ms
    pub initial_wait_ms: u64,

    /// Cap on the doubling wait.
    ///
    /// Default: 2000 ms
    pub max_wait_ms: u64,
}

impl MonitorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_wait_ms == 0 {
            return Err(ConfigError::invalid(
                "monitor.initial_wait_ms",
                "wait must be positive",
            ));
        }
        if self.max_wait_ms == 0 {
            return Err(ConfigError::invalid(
                "monitor.max_wait_ms",
                "wait must be positive",
            ));
        }
        if self.initial_wait_ms > self.max_wait_ms {
            return Err(ConfigError::invalid(
                "monitor.initial_wait_ms",
                format!(
                    "initial wait {} ms exceeds max wait {} ms",
                    self.initial_wait_ms, self.max_wait_ms
                ),
            ));
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            initial_wait_ms: 2_000,
            max_wait_ms: 2_000,
        }
    }
}

/// STOMP publisher and subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StompConfig {
    /// Prefix inserted before `frugal.` in publish destinations
    pub topic_prefix: String,
    /// Prefix inserted before `frugal.` in subscribe destinations
    pub consumer_prefix: String,
    /// Subscribe to `/queue/` instead of `/topic/`
    pub use_queue: bool,
    /// Largest publish payload. Default: 32 MiB
    pub max_publish_size: usize,
    /// Attempts handed to the reconnect handler. Default: 3
    pub reconnect_attempts: u32,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            topic_prefix: String::new(),
            consumer_prefix: String::new(),
            use_queue: false,
            max_publish_size: 32 * 1024 * 1024,
            reconnect_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.server.worker_count, 1);
        assert_eq!(config.server.queue_length, 64);
        assert_eq!(config.server.high_watermark(), Duration::from_secs(5));
        assert_eq!(config.server.max_response_size, 1024 * 1024);
        assert_eq!(config.http.request_size_limit, 0);
        assert_eq!(config.stomp.max_publish_size, 32 * 1024 * 1024);
        assert_eq!(config.stomp.reconnect_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(RuntimeConfig::from_json("{}").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = RuntimeConfig::from_json(r#"{"server": {"worker_count": 0}}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "server.worker_count",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_inverted_waits() {
        let err = RuntimeConfig::from_json(
            r#"{"monitor": {"initial_wait_ms": 5000, "max_wait_ms": 100}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration for monitor.initial_wait_ms: initial wait 5000 ms exceeds max wait 100 ms"
        );
    }

    #[test]
    fn test_parse_error() {
        let err = RuntimeConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
