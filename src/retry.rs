//! Bounded retry and backoff policy shared by the link and session machines
//!
//! Pure functions only: the machines ask for a decision and carry the delay
//! into the provider call, nothing here sleeps.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of consecutive retries (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds, indexed by attempt number
    #[serde(default)]
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay: u64,
}

fn default_sustained_delay() -> u64 {
    2000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            backoff_pattern: vec![0, 250, 500, 1000, 2000],
            sustained_delay: default_sustained_delay(),
        }
    }
}

impl RetryPolicy {
    /// Policy with a retry cap and the default backoff pattern
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Default::default()
        }
    }

    /// Policy that retries forever
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Default::default()
        }
    }

    /// Backoff delay for the given attempt (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay);
        Duration::from_millis(millis)
    }

    /// Decide whether another attempt is allowed after `completed` attempts
    pub fn decide(&self, completed: u32) -> RetryDecision {
        if let Some(max_attempts) = self.max_attempts {
            if completed >= max_attempts {
                return RetryDecision::Exhausted { attempts: completed };
            }
        }

        let attempt = completed.saturating_add(1);
        RetryDecision::Retry {
            attempt,
            delay: self.backoff_delay(attempt),
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or unset for unlimited".to_string());
        }
        Ok(())
    }

    /// Display form of the retry cap for log lines
    pub fn max_display(&self) -> String {
        self.max_attempts
            .map_or("∞".to_string(), |max| max.to_string())
    }
}

/// Outcome of consulting a [`RetryPolicy`]
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Proceed with attempt number `attempt` after `delay`
    Retry { attempt: u32, delay: Duration },
    /// No attempts left
    Exhausted { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.backoff_pattern, vec![0, 250, 500, 1000, 2000]);
        assert_eq!(policy.sustained_delay, 2000);
    }

    #[test]
    fn test_backoff_delay_follows_pattern_then_sustains() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_delay(1), Duration::ZERO);
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(250));
        assert_eq!(policy.backoff_delay(5), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(6), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(100), Duration::from_millis(2000));
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let policy = RetryPolicy {
            max_attempts: None,
            backoff_pattern: vec![],
            sustained_delay: 40,
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(40));
    }

    #[test]
    fn test_decide_bounded() {
        let policy = RetryPolicy::bounded(2);

        assert_eq!(
            policy.decide(0),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            policy.decide(1),
            RetryDecision::Retry {
                attempt: 2,
                delay: Duration::from_millis(250)
            }
        );
        assert_eq!(policy.decide(2), RetryDecision::Exhausted { attempts: 2 });
    }

    #[test]
    fn test_decide_unbounded_never_exhausts() {
        let policy = RetryPolicy::unbounded();
        assert!(matches!(
            policy.decide(10_000),
            RetryDecision::Retry { attempt: 10_001, .. }
        ));
    }

    #[test]
    fn test_decide_unbounded_saturates_at_max_count() {
        let policy = RetryPolicy::unbounded();
        assert_eq!(
            policy.decide(u32::MAX),
            RetryDecision::Retry {
                attempt: u32::MAX,
                delay: Duration::from_millis(2000)
            }
        );
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::unbounded().validate().is_ok());
        assert!(RetryPolicy::bounded(0).validate().is_err());
    }

    #[test]
    fn test_max_display() {
        assert_eq!(RetryPolicy::bounded(5).max_display(), "5");
        assert_eq!(RetryPolicy::unbounded().max_display(), "∞");
    }
}
