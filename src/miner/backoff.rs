//! Restart backoff for a crashing miner.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff applied when the miner dies without being asked to.
///
/// Delays double from `initial_delay_seconds` up to `max_delay_seconds`. A
/// miner that stayed up for `stable_after_seconds` before dying starts the
/// sequence over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub stable_after_seconds: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_seconds: 10,
            max_delay_seconds: 600,
            stable_after_seconds: 120,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let shift = (attempt - 1).min(32);
        let secs = self
            .initial_delay_seconds
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_seconds.max(self.initial_delay_seconds));
        Duration::from_secs(secs)
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_delay_seconds < self.initial_delay_seconds {
            return Err(format!(
                "restart_backoff.max_delay_seconds ({}) is below initial_delay_seconds ({})",
                self.max_delay_seconds, self.initial_delay_seconds
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let backoff = BackoffConfig {
            initial_delay_seconds: 5,
            max_delay_seconds: 60,
            stable_after_seconds: 30,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(40));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(60));
        assert_eq!(backoff.delay_for_attempt(500), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_initial_delay_disables_backoff() {
        let backoff = BackoffConfig {
            initial_delay_seconds: 0,
            max_delay_seconds: 0,
            stable_after_seconds: 0,
        };
        assert_eq!(backoff.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_validate() {
        assert!(BackoffConfig::default().validate().is_ok());
        let bad = BackoffConfig {
            initial_delay_seconds: 100,
            max_delay_seconds: 10,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let backoff: BackoffConfig = serde_json::from_str(r#"{"max_delay_seconds":30}"#).unwrap();
        assert_eq!(backoff.initial_delay_seconds, 10);
        assert_eq!(backoff.max_delay_seconds, 30);
    }
}
