//! Exponential backoff used between gateway reconnect attempts.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::types::Error;

const DEFAULT_BASE: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.2;

/// Backoff tuning.
///
/// Delays stay non-decreasing as long as `multiplier >= 1.0 + jitter`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay returned for the first attempt (before jitter).
    pub base: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Number of delays handed out before giving up (`None` = retry forever).
    pub max_attempts: Option<u32>,
    /// Extra random fraction in `[0, jitter)` added on top of the raw delay.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: None,
            jitter: DEFAULT_JITTER,
        }
    }
}

/// Capped, resettable exponential delay sequence.
///
/// Owned by a single reconnect loop, so there is no internal locking.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since creation or the last [`reset`](Self::reset).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns `min(base * multiplier^attempt * (1 + jitter), max_delay)` and
    /// advances the attempt counter.
    pub fn next_delay(&mut self) -> Result<Duration, Error> {
        if let Some(max) = self.config.max_attempts
            && self.attempt >= max
        {
            return Err(Error::BackoffExhausted {
                attempts: self.attempt,
            });
        }
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Ok(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Compute the next delay, log it, and sleep for it.
    pub async fn delay(&mut self) -> Result<Duration, Error> {
        let delay = self.next_delay()?;
        tracing::info!(
            attempt = self.attempt,
            "Attempting a reconnect in {:.2}s",
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        Ok(delay)
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.powi(exp) * (1.0 + jitter_fraction(self.config.jitter));
        let secs = self.config.base.as_secs_f64() * factor;
        let cap = self.config.max_delay;
        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            cap
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

/// Random fraction in `[0, ratio)` from the wall clock's subsecond nanos.
fn jitter_fraction(ratio: f64) -> f64 {
    if ratio.is_nan() || ratio <= 0.0 {
        return 0.0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1_000_000) / 1_000_000.0 * ratio
}
