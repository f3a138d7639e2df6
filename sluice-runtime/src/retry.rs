//! Retry policy for polling statements that have not reached a terminal state

use crate::{Error, Result};
use std::str::FromStr;
use std::time::Duration;

/// Delay strategy between polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Poll again immediately
    None,

    /// Fixed delay between polls
    Fixed,

    /// Exponential backoff, capped at `max_delay`
    Exponential,
}

impl FromStr for RetryStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RetryStrategy::None),
            "fixed" => Ok(RetryStrategy::Fixed),
            "exponential" => Ok(RetryStrategy::Exponential),
            other => Err(Error::Configuration(format!(
                "unknown retry strategy '{}' (expected none, fixed or exponential)",
                other
            ))),
        }
    }
}

/// Retry policy configuration
///
/// `max_attempts` bounds the total number of polls for one statement, so
/// the longest wait is roughly `max_attempts - 1` delays.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of polls
    pub max_attempts: u32,

    /// Delay before the second poll
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    pub strategy: RetryStrategy,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            strategy: RetryStrategy::Fixed,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between a bounded number of polls
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            strategy: RetryStrategy::Fixed,
            ..Default::default()
        }
    }

    /// Load from `SLUICE_POLL_MAX_ATTEMPTS`, `SLUICE_POLL_DELAY_SECS` and
    /// `SLUICE_POLL_STRATEGY`, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let max_attempts = match std::env::var("SLUICE_POLL_MAX_ATTEMPTS") {
            Ok(v) => v.parse().map_err(|_| {
                Error::Configuration(format!("SLUICE_POLL_MAX_ATTEMPTS must be an integer, got '{}'", v))
            })?,
            Err(_) => defaults.max_attempts,
        };

        let initial_delay = match std::env::var("SLUICE_POLL_DELAY_SECS") {
            Ok(v) => Duration::from_secs(v.parse().map_err(|_| {
                Error::Configuration(format!("SLUICE_POLL_DELAY_SECS must be an integer, got '{}'", v))
            })?),
            Err(_) => defaults.initial_delay,
        };

        let strategy = match std::env::var("SLUICE_POLL_STRATEGY") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.strategy,
        };

        let policy = Self {
            max_attempts,
            initial_delay,
            max_delay: defaults.max_delay.max(initial_delay),
            strategy,
            backoff_multiplier: defaults.backoff_multiplier,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Configuration(
                "retry ceiling must allow at least one poll".into(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(Error::Configuration(
                "backoff_multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Delay to wait after the given (zero-based) attempt
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::None => Duration::from_secs(0),
            RetryStrategy::Fixed => self.initial_delay,
            RetryStrategy::Exponential => {
                let delay =
                    self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
                Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
            }
        }
    }

    /// Whether another poll is allowed after `attempts` polls
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Total time spent sleeping if every attempt is used
    pub fn max_wait(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.calculate_delay(attempt))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(30));
        assert_eq!(policy.max_wait(), Duration::from_secs(120));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            strategy: RetryStrategy::Exponential,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..Default::default()
        };

        assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(policy.calculate_delay(6), Duration::from_secs(5));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Fixed".parse::<RetryStrategy>().unwrap(), RetryStrategy::Fixed);
        assert_eq!(
            "exponential".parse::<RetryStrategy>().unwrap(),
            RetryStrategy::Exponential
        );
        assert!("jitter".parse::<RetryStrategy>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert!(policy.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }
}
