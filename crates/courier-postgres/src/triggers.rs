//! Wake-up triggers for the source's worker pool.
//!
//! A trigger is anything that emits on a channel when there may be pending
//! work: a fixed interval, a `LISTEN/NOTIFY` subscription, or the fan-in of
//! several of those. Channels close when the cancellation token fires, which
//! is how workers learn to stop.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// Interval between listener keepalive checks.
const NOTIFY_KEEPALIVE: Duration = Duration::from_secs(30);

/// Pause after a listener error before the next receive attempt.
const NOTIFY_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Emits on a channel whenever the source should look for pending rows.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Starts the trigger.
    ///
    /// The returned channel emits one element per wake-up and closes when
    /// the token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the trigger cannot connect.
    async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<()>>;
}

/// Emits every `interval` until cancelled.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTrigger {
    interval: Duration,
}

impl IntervalTrigger {
    /// Creates an interval trigger.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<()>> {
        let (sender, receiver) = mpsc::channel(1);
        let interval = self.interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            sent = sender.send(()) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });
        Ok(receiver)
    }
}

/// Emits on every notification received on a `LISTEN` channel.
///
/// The listener reconnects transparently after connection loss; errors are
/// logged and the subscription resumes. A 30 s keepalive window bounds how
/// long a dead connection can go unnoticed.
#[derive(Debug, Clone)]
pub struct NotifyTrigger {
    url: String,
    channel: String,
}

impl NotifyTrigger {
    /// Creates a notify trigger for the given connection string and channel.
    pub fn new(url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self { url: url.into(), channel: channel.into() }
    }
}

#[async_trait]
impl Trigger for NotifyTrigger {
    async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<()>> {
        let mut listener = PgListener::connect(&self.url).await?;
        listener.listen(&self.channel).await?;

        let (sender, receiver) = mpsc::channel(1);
        let channel = self.channel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    outcome = tokio::time::timeout(NOTIFY_KEEPALIVE, listener.recv()) => {
                        match outcome {
                            // Keepalive window passed quietly; re-arm.
                            Err(_elapsed) => continue,
                            Ok(Ok(notification)) => {
                                debug!(
                                    channel = %channel,
                                    payload = notification.payload(),
                                    "notification received"
                                );
                                tokio::select! {
                                    () = cancel.cancelled() => break,
                                    sent = sender.send(()) => {
                                        if sent.is_err() {
                                            break;
                                        }
                                    }
                                }
                            },
                            Ok(Err(error)) => {
                                // The listener re-establishes its connection
                                // on the next receive.
                                warn!(channel = %channel, error = %error, "notify listener error");
                                tokio::time::sleep(NOTIFY_ERROR_BACKOFF).await;
                            },
                        }
                    }
                }
            }
        });
        Ok(receiver)
    }
}

/// Fans several triggers into one channel.
///
/// The output closes once every upstream channel has closed.
pub(crate) struct AggregateTrigger {
    triggers: Vec<Arc<dyn Trigger>>,
}

impl AggregateTrigger {
    pub(crate) fn new(triggers: Vec<Arc<dyn Trigger>>) -> Self {
        Self { triggers }
    }

    pub(crate) async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<()>> {
        let (sender, receiver) = mpsc::channel(1);
        for trigger in &self.triggers {
            let mut upstream = trigger.start(cancel.clone()).await?;
            let sender = sender.clone();
            tokio::spawn(async move {
                while upstream.recv().await.is_some() {
                    if sender.send(()).await.is_err() {
                        break;
                    }
                }
            });
        }
        Ok(receiver)
    }
}
