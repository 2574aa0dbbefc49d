//! Clock abstraction for testable scheduling decisions.
//!
//! Production code uses [`SystemClock`]; tests inject a controllable
//! implementation so retry schedules and poll timing stay deterministic.

use std::{future::Future, pin::Pin, time::Duration};

use chrono::{DateTime, Utc};

/// A source of wall-clock time and async sleeps.
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// The production clock: system time and tokio sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}
