//! Retry backoff curves.
//!
//! A backoff maps a delivery attempt number to a delay. The curve is first
//! consulted for the second attempt (the first retry), so `attempt = 2` is
//! the origin of every formula. Results are rounded to whole seconds and
//! clamped by an inclusive ceiling.

use std::time::Duration;

/// Maps an attempt number to the delay before that attempt.
pub trait Backoff: Send + Sync {
    /// Returns the delay to apply before the given attempt.
    ///
    /// Called starting with `attempt = 2`, i.e. after the first failed
    /// dispatch.
    fn delay(&self, attempt: u32) -> Duration;
}

/// The same delay for every attempt.
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    /// Creates a backoff that always yields `delay`.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Backoff for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Linear backoff: `min(round(c + k * i), limit)` seconds, `i = attempt - 2`.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    c: f64,
    k: f64,
    limit: Duration,
}

impl LinearBackoff {
    /// Creates a linear backoff with base `c` seconds, slope `k` seconds per
    /// attempt, and an inclusive ceiling.
    pub fn new(c: f64, k: f64, limit: Duration) -> Self {
        Self { c, k, limit }
    }
}

impl Backoff for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let i = f64::from(attempt.saturating_sub(2));
        let seconds = self.c + self.k * i;
        if seconds >= self.limit.as_secs_f64() {
            return self.limit;
        }
        whole_seconds(seconds)
    }
}

/// Exponential backoff: `min(round(c + a * (e^(b * i) - 1)), limit)` seconds,
/// `i = attempt - 2`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    c: f64,
    a: f64,
    b: f64,
    limit: Duration,
}

impl ExponentialBackoff {
    /// Creates an exponential backoff with base `c` seconds, amplitude `a`,
    /// exponent scale `b`, and an inclusive ceiling.
    pub fn new(c: f64, a: f64, b: f64, limit: Duration) -> Self {
        Self { c, a, b, limit }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let i = f64::from(attempt.saturating_sub(2));
        let seconds = self.c + self.a * ((self.b * i).exp() - 1.0);
        if seconds > self.limit.as_secs_f64() {
            return self.limit;
        }
        whole_seconds(seconds)
    }
}

fn whole_seconds(seconds: f64) -> Duration {
    // Negative parameters are not meaningful; saturate at zero instead of
    // panicking on the cast.
    Duration::from_secs(seconds.round().max(0.0) as u64)
}
