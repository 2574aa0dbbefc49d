//! Property tests for backoff curve laws.
//!
//! Every curve must be monotone non-decreasing in the attempt number and
//! clamped by its ceiling, regardless of parameters.

use std::time::Duration;

use courier_core::{Backoff, ConstantBackoff, ExponentialBackoff, LinearBackoff};
use proptest::prelude::*;

proptest! {
    #[test]
    fn constant_is_flat(delay_secs in 0u64..3600, attempt in 2u32..64) {
        let backoff = ConstantBackoff::new(Duration::from_secs(delay_secs));
        prop_assert_eq!(backoff.delay(attempt), Duration::from_secs(delay_secs));
    }

    #[test]
    fn linear_is_monotone_and_clamped(
        c in 0.0f64..120.0,
        k in 0.0f64..30.0,
        limit_secs in 1u64..7200,
        attempt in 2u32..64,
    ) {
        let limit = Duration::from_secs(limit_secs);
        let backoff = LinearBackoff::new(c, k, limit);
        let current = backoff.delay(attempt);
        let next = backoff.delay(attempt + 1);
        prop_assert!(next >= current, "delay decreased: {current:?} -> {next:?}");
        prop_assert!(current <= limit, "delay {current:?} above ceiling {limit:?}");
    }

    #[test]
    fn exponential_is_monotone_and_clamped(
        c in 0.0f64..120.0,
        a in 0.0f64..30.0,
        b in 0.0f64..4.0,
        limit_secs in 1u64..7200,
        attempt in 2u32..32,
    ) {
        let limit = Duration::from_secs(limit_secs);
        let backoff = ExponentialBackoff::new(c, a, b, limit);
        let current = backoff.delay(attempt);
        let next = backoff.delay(attempt + 1);
        prop_assert!(next >= current, "delay decreased: {current:?} -> {next:?}");
        prop_assert!(current <= limit, "delay {current:?} above ceiling {limit:?}");
    }

    #[test]
    fn ceiling_is_sticky(
        c in 0.0f64..60.0,
        k in 1.0f64..30.0,
        limit_secs in 1u64..600,
        attempt in 2u32..64,
    ) {
        let limit = Duration::from_secs(limit_secs);
        let backoff = LinearBackoff::new(c, k, limit);
        if backoff.delay(attempt) == limit {
            prop_assert_eq!(backoff.delay(attempt + 1), limit);
        }
    }
}
