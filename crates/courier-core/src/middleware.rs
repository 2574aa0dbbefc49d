//! Handler middleware: retry budgets and backoff scheduling.
//!
//! Middlewares wrap a [`Handler`] and compose outer → inner. Stacking
//! `with_limit(n, with_backoff(b, h))` first lets the backoff pick a retry
//! time, then lets the limit promote the final failing attempt to fatal, so
//! the last attempt is dropped rather than rescheduled.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{backoff::Backoff, handler::HandlerError, receiver::Handler};

/// Overrides the retry time of non-fatal failures using a backoff curve.
///
/// The curve is consulted with `attempt + 1`: the delay applies to the
/// *next* attempt. Fatal results pass through untouched.
pub fn with_backoff<B>(backoff: B, next: Handler) -> Handler
where
    B: Backoff + 'static,
{
    let backoff = Arc::new(backoff);
    Arc::new(move |cx, delivery| {
        let next = Arc::clone(&next);
        let backoff = Arc::clone(&backoff);
        Box::pin(async move {
            let attempt = delivery.attempt;
            match next(cx, delivery).await {
                Err(error) if !error.is_fatal() => {
                    let retry_at = after(Utc::now(), backoff.delay(attempt + 1));
                    Err(HandlerError::retry_at(error.into_source(), retry_at))
                },
                result => result,
            }
        })
    })
}

/// Promotes any failure on or past the `limit`-th attempt to fatal.
///
/// Fatal results pass through unchanged.
pub fn with_limit(limit: u32, next: Handler) -> Handler {
    Arc::new(move |cx, delivery| {
        let next = Arc::clone(&next);
        Box::pin(async move {
            let attempt = delivery.attempt;
            match next(cx, delivery).await {
                Err(error) if attempt >= limit && !error.is_fatal() => {
                    Err(HandlerError::fatal(error.into_source()))
                },
                result => result,
            }
        })
    })
}

fn after(now: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay)
        .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use chrono::Utc;

    use super::*;
    use crate::{
        backoff::{ConstantBackoff, LinearBackoff},
        context::Context,
        handler::HandlerResult,
        message::Message,
        receiver::{handler, Delivery},
    };

    fn delivery(attempt: u32) -> Delivery {
        Delivery {
            queue: "q1".to_string(),
            attempt,
            message: Message::new("customers.created", Vec::new()).unwrap(),
        }
    }

    fn failing() -> Handler {
        handler(|_, _| async { Err(HandlerError::retry(anyhow!("still failing"))) })
    }

    fn fatal() -> Handler {
        handler(|_, _| async { Err(HandlerError::fatal(anyhow!("unprocessable"))) })
    }

    async fn run(h: &Handler, attempt: u32) -> HandlerResult {
        h(Context::new(), delivery(attempt)).await
    }

    #[tokio::test]
    async fn backoff_sets_retry_time_for_next_attempt() {
        let wrapped = with_backoff(ConstantBackoff::new(Duration::from_secs(10)), failing());
        let before = Utc::now();
        let error = run(&wrapped, 1).await.unwrap_err();
        let retry_at = error.retry_time().expect("retry time should be set");
        let delay = (retry_at - before).num_seconds();
        assert!((9..=11).contains(&delay), "unexpected delay: {delay}s");
    }

    #[tokio::test]
    async fn backoff_leaves_fatal_results_alone() {
        let wrapped = with_backoff(ConstantBackoff::new(Duration::from_secs(10)), fatal());
        let error = run(&wrapped, 1).await.unwrap_err();
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn limit_promotes_final_attempt_to_fatal() {
        let wrapped = with_limit(3, failing());
        assert!(!run(&wrapped, 1).await.unwrap_err().is_fatal());
        assert!(!run(&wrapped, 2).await.unwrap_err().is_fatal());
        assert!(run(&wrapped, 3).await.unwrap_err().is_fatal());
        assert!(run(&wrapped, 4).await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn limit_passes_success_through() {
        let wrapped = with_limit(1, handler(|_, _| async { Ok(()) }));
        assert!(run(&wrapped, 5).await.is_ok());
    }

    #[tokio::test]
    async fn stacked_limit_over_backoff_drops_last_attempt() {
        let wrapped =
            with_limit(3, with_backoff(LinearBackoff::new(2.0, 1.0, Duration::from_secs(10)), failing()));

        let second = run(&wrapped, 2).await.unwrap_err();
        assert!(!second.is_fatal());
        assert!(second.retry_time().is_some());

        let third = run(&wrapped, 3).await.unwrap_err();
        assert!(third.is_fatal());
        assert_eq!(third.retry_time(), None);
    }
}
