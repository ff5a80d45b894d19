use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SandboxError;

/// Default number of retries after the initial attempt.
pub const DEFAULT_RETRIES: u32 = 0;
/// Default base delay between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Caller-supplied delay function: `(attempt, base_delay) -> delay`.
pub type DelayFn = Arc<dyn Fn(u32, Duration) -> Duration + Send + Sync>;

/// Delay growth between consecutive retries.
#[derive(Clone, Default)]
pub enum Backoff {
    Fixed,
    Linear,
    #[default]
    Exponential,
    Custom(DelayFn),
}

impl Backoff {
    pub fn custom<F>(delay: F) -> Self
    where
        F: Fn(u32, Duration) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(delay))
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => f.write_str("Fixed"),
            Self::Linear => f.write_str("Linear"),
            Self::Exponential => f.write_str("Exponential"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Outcome of evaluating one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    const STOP: Self = Self {
        should_retry: false,
        delay: Duration::ZERO,
    };
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub retries: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_RETRY_DELAY,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match &self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let exponent = (attempt - 1).min(30);
                self.base_delay.saturating_mul(2u32.saturating_pow(exponent))
            }
            Backoff::Custom(delay) => delay(attempt, self.base_delay),
        }
    }

    /// Decide whether the failed attempt number `attempt` (1-based) is retried.
    pub fn decide(&self, error: &SandboxError, attempt: u32) -> RetryDecision {
        if attempt > self.retries || !error.is_retryable() {
            return RetryDecision::STOP;
        }

        RetryDecision {
            should_retry: true,
            delay: self.delay_for(attempt),
        }
    }
}
