//! Configuration types for executing contexts.

use std::time::Duration;

use serde::Deserialize;

use crate::error::BridgeResult;

/// HTML: timers nested deeper than this get clamped to `min_nested_timeout`
pub const DEFAULT_MAX_TIMER_NESTING_LEVEL: u32 = 5;
/// HTML: minimum timeout for deeply nested timers (4ms)
pub const DEFAULT_MIN_NESTED_TIMEOUT_MS: u64 = 4;

/// What happens to an unhandled rejection once it has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReportPolicy {
    /// Keep the rejection and report it again at every drain until it is
    /// handled; handling it later emits a `rejectionhandled` event.
    #[default]
    EveryDrain,
    /// Report once, then forget it. Handling it later emits nothing.
    Once,
}

/// Per-context configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Retention policy for reported unhandled rejections.
    /// Default: `EveryDrain`
    pub rejection_policy: RejectionReportPolicy,

    /// Nesting level above which timer delays are clamped.
    /// Default: 5
    pub max_timer_nesting_level: u32,

    /// Minimum delay for timers nested deeper than `max_timer_nesting_level`.
    /// Default: 4ms
    #[serde(rename = "min_nested_timeout_ms", with = "millis")]
    pub min_nested_timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            rejection_policy: RejectionReportPolicy::EveryDrain,
            max_timer_nesting_level: DEFAULT_MAX_TIMER_NESTING_LEVEL,
            min_nested_timeout: Duration::from_millis(DEFAULT_MIN_NESTED_TIMEOUT_MS),
        }
    }
}

impl ContextConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the rejection retention policy.
    pub fn rejection_policy(mut self, policy: RejectionReportPolicy) -> Self {
        self.rejection_policy = policy;
        self
    }

    /// Set the nesting level above which timer delays are clamped.
    pub fn max_timer_nesting_level(mut self, level: u32) -> Self {
        self.max_timer_nesting_level = level;
        self
    }

    /// Set the minimum delay for deeply nested timers.
    pub fn min_nested_timeout(mut self, timeout: Duration) -> Self {
        self.min_nested_timeout = timeout;
        self
    }

    /// Effective delay for a timer created at `nesting_level`.
    pub fn clamp_timer_delay(&self, delay: Duration, nesting_level: u32) -> Duration {
        if nesting_level > self.max_timer_nesting_level {
            delay.max(self.min_nested_timeout)
        } else {
            delay
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
