//! Reconnection policy.
//!
//! The manager waits [`ReconnectPolicy::delay_for`] between attempts after
//! an involuntary disconnect. The default is a constant delay; exponential
//! growth with a cap and a bounded attempt count are opt-in.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RealtimeError;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5_000);

/// Default cap for exponential backoff.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_millis(60_000);

/// How the delay evolves across consecutive failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStrategy {
    /// Same delay before every attempt.
    Fixed,
    /// Delay doubles per attempt, capped at the policy's `max_delay`.
    Exponential,
}

impl FromStr for ReconnectStrategy {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(RealtimeError::Config(format!(
                "unknown reconnect strategy {other:?}"
            ))),
        }
    }
}

impl fmt::Display for ReconnectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => f.write_str("fixed"),
            Self::Exponential => f.write_str("exponential"),
        }
    }
}

/// Delay schedule for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay growth strategy.
    pub strategy: ReconnectStrategy,
    /// Fixed delay, or the first delay for exponential backoff.
    pub base_delay: Duration,
    /// Upper bound for exponential backoff.
    pub max_delay: Duration,
    /// Give up after this many failed attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Constant delay between attempts, retrying forever.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            strategy: ReconnectStrategy::Fixed,
            base_delay: delay,
            max_delay: delay,
            max_attempts: None,
        }
    }

    /// Doubling delay starting at `base`, capped at `max`, retrying forever.
    #[must_use]
    pub const fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            strategy: ReconnectStrategy::Exponential,
            base_delay: base,
            max_delay: max,
            max_attempts: None,
        }
    }

    /// Limits the number of consecutive failed attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Returns the delay before attempt number `attempt` (zero-based), or
    /// `None` once the attempt budget is spent.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && attempt >= max
        {
            return None;
        }
        let delay = match self.strategy {
            ReconnectStrategy::Fixed => self.base_delay,
            ReconnectStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt);
                self.base_delay
                    .checked_mul(factor)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            }
        };
        Some(delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}
