//! Client configuration model.
//!
//! Loading lives in `recs-infrastructure::config_service`; this is only the shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::quota::ANONYMOUS_DAILY_LIMIT;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the recommendation API.
    pub api_base_url: String,
    /// Use the progress stream. When false, the request/reply fallback is used.
    pub streaming: bool,
    pub stream: StreamConfig,
    /// Request timeout of the non-streaming calls, in seconds.
    pub request_timeout_secs: u64,
    /// Daily ceiling for anonymous principals.
    pub anonymous_daily_limit: u32,
    /// Daily ceiling for authenticated principals. Informational; the server
    /// enforces it.
    pub authenticated_daily_limit: u32,
    /// Refresh the owner's recommendation list after options are generated.
    pub prefetch_after_generate: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            streaming: true,
            stream: StreamConfig::default(),
            request_timeout_secs: 120,
            anonymous_daily_limit: ANONYMOUS_DAILY_LIMIT,
            authenticated_daily_limit: 50,
            prefetch_after_generate: false,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Streaming path tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub max_retries: u32,
    /// Linear backoff unit: the n-th retry waits `n * backoff_ms`.
    pub backoff_ms: u64,
    /// How long a transport error must persist before it is acted on.
    pub debounce_ms: u64,
    /// Interval of the observational keep-alive timer.
    pub keep_alive_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 1_000,
            debounce_ms: 2_000,
            keep_alive_secs: 30,
        }
    }
}

impl StreamConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}
