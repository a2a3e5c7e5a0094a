use crate::config::{EngineConfig, MAX_RETRIES_LIMIT};
use crate::transport::AttemptError;
use std::time::Duration;

/// Decision for how to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    GiveUp,
}

/// Bounded retry policy for a single webhook call.
///
/// Only failures that another attempt can plausibly fix are retried: transport
/// errors, timeouts and the configured statuses. Everything else gives up at once
/// so the fallback output is produced quickly.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy {
    /// Policy for `config`. `max_retries` is clamped to [`MAX_RETRIES_LIMIT`] however
    /// the config was built.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries.min(MAX_RETRIES_LIMIT),
            min_delay: config.retry_min_delay,
            max_delay: config.retry_max_delay.max(config.retry_min_delay),
            retry_on_status: config.retry_on_status.clone(),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    /// Exponential backoff `min_delay * 2^attempt`, capped at `max_delay`.
    /// A server-provided `Retry-After` replaces the computed value but is still capped.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = if self.min_delay.is_zero() {
            Duration::ZERO
        } else {
            let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
            self.min_delay.saturating_mul(factor)
        };
        retry_after.unwrap_or(base).min(self.max_delay)
    }

    /// Decide what to do after a failed attempt.
    ///
    /// `attempt` is 0-based (first failure => attempt=0).
    pub fn decide(&self, error: &AttemptError, attempt: u32) -> Decision {
        let (retryable, retry_after) = match error {
            AttemptError::Connect(_) | AttemptError::Timeout => (true, None),
            AttemptError::Status {
                status,
                retry_after,
                ..
            } => (self.is_retryable_status(*status), *retry_after),
            AttemptError::Build(_) | AttemptError::Body(_) => (false, None),
        };

        if retryable && attempt < self.max_retries {
            Decision::Retry {
                delay: self.backoff_delay(attempt, retry_after),
            }
        } else {
            Decision::GiveUp
        }
    }
}
