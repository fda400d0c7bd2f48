//! Client configuration.
//!
//! Durations are stored as milliseconds so the struct round-trips through
//! JSON unchanged; use the `*_duration()` accessors in code.

use std::time::Duration;

use ckv_common::Endpoint;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::pool::PoolConfig;

/// Settings for [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Seed host. May carry its own port as `"host:port"`, which then wins
    /// over `port`.
    pub host: String,

    /// Seed port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect and I/O timeout in milliseconds (default: 3000).
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,

    /// Server-side idle timeout in milliseconds; connections idle this long
    /// are reopened before use (default: 60000).
    #[serde(default = "default_server_timeout_ms")]
    pub server_timeout_ms: u64,

    /// Connections per shard (default: 8).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Borrow attempts on an exhausted pool (default: 3).
    #[serde(default = "default_borrow_retry_times")]
    pub borrow_retry_times: u32,

    /// Sleep between borrow attempts in milliseconds (default: 100).
    #[serde(default = "default_retry_interval_ms")]
    pub borrow_retry_interval_ms: u64,

    /// Polls while waiting for a forced refresh (default: 60).
    #[serde(default = "default_wait_retry_times")]
    pub wait_retry_times: u32,

    /// Interval between those polls in milliseconds (default: 100).
    #[serde(default = "default_retry_interval_ms")]
    pub wait_retry_interval_ms: u64,

    /// Pause after a failed refresh before trying again, in milliseconds
    /// (default: 1000).
    #[serde(default = "default_refresh_backoff_ms")]
    pub refresh_backoff_ms: u64,

    /// Periodic refresh even without a trigger, in milliseconds
    /// (default: off).
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
}

fn default_port() -> u16 {
    6379
}

fn default_client_timeout_ms() -> u64 {
    3_000
}

fn default_server_timeout_ms() -> u64 {
    60_000
}

fn default_pool_size() -> usize {
    8
}

fn default_borrow_retry_times() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    100
}

fn default_wait_retry_times() -> u32 {
    60
}

fn default_refresh_backoff_ms() -> u64 {
    1_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_port(),
            client_timeout_ms: default_client_timeout_ms(),
            server_timeout_ms: default_server_timeout_ms(),
            pool_size: default_pool_size(),
            borrow_retry_times: default_borrow_retry_times(),
            borrow_retry_interval_ms: default_retry_interval_ms(),
            wait_retry_times: default_wait_retry_times(),
            wait_retry_interval_ms: default_retry_interval_ms(),
            refresh_backoff_ms: default_refresh_backoff_ms(),
            refresh_interval_ms: None,
        }
    }
}

impl ClientConfig {
    /// Config for a seed address, other fields at their defaults.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> ClientResult<Self> {
        serde_json::from_str(json).map_err(|e| ClientError::Param(e.to_string()))
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> ClientResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ClientError::Param(e.to_string()))
    }

    /// Resolved seed endpoint, honouring a `"host:port"` host.
    pub fn seed(&self) -> ClientResult<Endpoint> {
        Ok(Endpoint::parse_with_default(&self.host, self.port)?)
    }

    /// Rejects an empty host, zero port, zero timeouts or an empty pool.
    pub fn validate(&self) -> ClientResult<()> {
        self.seed()?;
        if self.client_timeout_ms == 0 || self.server_timeout_ms == 0 {
            return Err(ClientError::Param("timeouts must be positive".into()));
        }
        if self.pool_size == 0 {
            return Err(ClientError::Param("pool_size must be positive".into()));
        }
        if self.refresh_interval_ms == Some(0) {
            return Err(ClientError::Param("refresh_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn client_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn server_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    pub fn wait_retry_interval_duration(&self) -> Duration {
        Duration::from_millis(self.wait_retry_interval_ms)
    }

    pub fn refresh_backoff_duration(&self) -> Duration {
        Duration::from_millis(self.refresh_backoff_ms)
    }

    pub fn refresh_interval_duration(&self) -> Option<Duration> {
        self.refresh_interval_ms.map(Duration::from_millis)
    }

    /// Per-shard pool settings.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            client_timeout: self.client_timeout_duration(),
            server_timeout: self.server_timeout_duration(),
            borrow_retry_times: self.borrow_retry_times,
            borrow_retry_interval: Duration::from_millis(self.borrow_retry_interval_ms),
        }
    }
}
