//! Exponential backoff with jitter.
//!
//! One [`BackoffPolicy`] is shared by every retrying call site: the resilient
//! fetch loop, the session refresh path, and the error manager. Delay
//! formula: `max(base, min(base * 2^attempt, cap) ± jitter_fraction)`.

use std::time::Duration;

use rand::Rng;

/// Default maximum attempts (including the initial attempt).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default delay cap (10 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default jitter fraction (±10%).
const DEFAULT_JITTER_FRACTION: f64 = 0.1;

/// Configuration for retry backoff.
///
/// With defaults, nominal delays are 1s, 2s, 4s, ... capped at 10s, each
/// jittered by ±10% and never below the base delay.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
    max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with custom settings.
    ///
    /// `max_attempts` counts the initial attempt and is clamped to at least 1;
    /// `jitter_fraction` is clamped to `[0, 1]`.
    #[must_use]
    pub fn new(
        base_delay: Duration,
        max_delay: Duration,
        jitter_fraction: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_fraction: jitter_fraction.clamp(0.0, 1.0),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Creates a policy with a custom attempt ceiling, defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the configured attempt ceiling.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns true while `attempt` (0-indexed count of failures so far)
    /// leaves room for another try.
    #[must_use]
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Computes the jittered delay before retrying after failure `attempt`
    /// (0-indexed: the delay after the first failure uses `attempt = 0`).
    ///
    /// The exponential delay is capped, jittered by the configured fraction
    /// in both directions, and floored at the base delay so consecutive
    /// retries never fire immediately.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = millis_f64(self.base_delay);
        let exponential = base_ms * 2_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let capped = exponential.min(millis_f64(self.max_delay));

        let jitter_scale: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        let jittered = capped * (1.0 + self.jitter_fraction * jitter_scale);

        Duration::from_millis(jittered.max(base_ms) as u64)
    }
}

fn millis_f64(duration: Duration) -> f64 {
    // Delays here are seconds-scale; precision loss is irrelevant.
    #[allow(clippy::cast_precision_loss)]
    let ms = duration.as_millis() as f64;
    ms
}
