//! Retry and orchestration policies

use std::time::Duration;

use serde::Deserialize;

/// Bounded retry with exponential backoff for one node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts against one node, including the first
    pub max_tries: u32,
    /// Delay before the second attempt
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    /// Growth factor applied to each further delay
    pub backoff_multiplier: f64,
    /// Per-attempt request timeout
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Per-attempt connect timeout
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            request_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_tries: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_tries,
            base_delay,
            backoff_multiplier,
            ..Default::default()
        }
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// At least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_tries.max(1)
    }

    /// Sleep before attempt `attempt` (1-based): nothing before the first,
    /// `base_delay * multiplier^(attempt - 2)` before every later one.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let nanos = (self.base_delay.as_nanos() as f64 * factor).round();
        if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            Duration::MAX
        }
    }

    /// Upper bound on one attempt: connect plus request timeout.
    pub fn attempt_timeout(&self) -> Duration {
        self.connect_timeout.saturating_add(self.request_timeout)
    }
}

/// Bounds on the outer node/datacenter failover loop of one logical call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Full passes over all datacenters before giving up
    pub max_datacenter_passes: u32,
    /// Overall deadline for one logical call
    #[serde(rename = "call_deadline_ms", with = "millis::option")]
    pub call_deadline: Option<Duration>,
    /// Treat an exhausted retry budget like a 503 and fail over
    pub failover_on_retries_exhausted: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_datacenter_passes: 1,
            call_deadline: None,
            failover_on_retries_exhausted: true,
        }
    }
}

/// Serde helpers for durations written as integer milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
        }
    }
}
