//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::{ReadinessConfig, RestartConfig};

/// Jittered exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 waits nothing.
    ///
    /// Doubles from `base_ms`, caps at `max_ms`, then adds up to 10% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u64.saturating_pow(attempt - 1);
        let capped = self.base_ms.saturating_mul(factor).min(self.max_ms);

        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped.saturating_add(jitter))
    }
}

impl From<&ReadinessConfig> for Backoff {
    fn from(config: &ReadinessConfig) -> Self {
        Self::new(config.base_delay_ms, config.max_delay_ms)
    }
}

impl From<&RestartConfig> for Backoff {
    fn from(config: &RestartConfig) -> Self {
        Self::new(config.base_delay_ms, config.max_delay_ms)
    }
}
