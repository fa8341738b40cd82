// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the CRM data layer.
//!
//! # Example
//!
//! ```
//! use crm_data::CrmDataConfig;
//! use std::time::Duration;
//!
//! // Minimal config (uses defaults)
//! let config = CrmDataConfig::default();
//! assert_eq!(config.cache_ttl(), Duration::from_secs(5 * 60));
//! assert_eq!(config.cache_max_entries, 100);
//!
//! // Tuned config
//! let config = CrmDataConfig {
//!     retry_delay_ms: 250,
//!     request_timeout_ms: 10_000,
//!     ..Default::default()
//! };
//! assert_eq!(config.request_timeout(), Duration::from_secs(10));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::realtime::ReconnectConfig;
use crate::resilience::backoff::Backoff;
use crate::resilience::retry::RetryConfig;

/// Configuration for the data layer.
///
/// All fields have defaults matching the admin panel's historical behaviour:
/// a 5 minute / 100 entry cache, 3 attempts with linear 1s retry spacing,
/// 30s request timeout and 5 reconnect attempts.
#[derive(Debug, Clone, Deserialize)]
pub struct CrmDataConfig {
    /// How long a cached read stays valid (default: 5 minutes)
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Max cached reads before FIFO eviction (default: 100)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Total attempts for a transient failure, including the first call
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base retry delay; attempt `n` waits `n * retry_delay_ms`
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-call timeout for store round-trips
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Real-time listener reconnect budget
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// Idle time before a session is considered expired (default: 30 minutes)
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Write an `activity_logs` entry for every successful operation
    #[serde(default = "default_true")]
    pub activity_log_enabled: bool,

    /// Record rejected writes into `validation_errors`
    #[serde(default = "default_true")]
    pub log_validation_errors: bool,
}

fn default_cache_ttl_ms() -> u64 { 5 * 60 * 1000 }
fn default_cache_max_entries() -> usize { 100 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_max_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_base_delay_ms() -> u64 { 1000 }
fn default_reconnect_max_delay_ms() -> u64 { 60_000 }
fn default_session_timeout_ms() -> u64 { 30 * 60 * 1000 }
fn default_true() -> bool { true }

impl Default for CrmDataConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_max_entries: default_cache_max_entries(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            activity_log_enabled: default_true(),
            log_validation_errors: default_true(),
        }
    }
}

impl CrmDataConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Retry queue policy: linear spacing, `retry_attempts` total attempts.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_attempts,
            backoff: Backoff::Linear {
                base: Duration::from_millis(self.retry_delay_ms),
            },
        }
    }

    /// Listener reconnect policy: `2^attempt * base`, capped.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: self.max_reconnect_attempts,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.reconnect_base_delay_ms),
                max: Duration::from_millis(self.reconnect_max_delay_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CrmDataConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache_max_entries, 100);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert!(config.activity_log_enabled);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CrmDataConfig =
            serde_json::from_str(r#"{"cache_max_entries": 10, "activity_log_enabled": false}"#)
                .unwrap();
        assert_eq!(config.cache_max_entries, 10);
        assert!(!config.activity_log_enabled);
        assert_eq!(config.retry_delay_ms, 1000);
        assert!(config.log_validation_errors);
    }

    #[test]
    fn test_retry_config_is_linear() {
        let retry = CrmDataConfig::default().retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.backoff.delay(1), Duration::from_secs(1));
        assert_eq!(retry.backoff.delay(2), Duration::from_secs(2));
    }

    #[test]
    fn test_reconnect_config_is_exponential() {
        let reconnect = CrmDataConfig::default().reconnect_config();
        assert_eq!(reconnect.max_attempts, 5);
        assert_eq!(reconnect.backoff.delay(1), Duration::from_secs(2));
        assert_eq!(reconnect.backoff.delay(3), Duration::from_secs(8));
    }
}
