//! Bridges carry accepted batches from the publisher to its destinations.
//!
//! The sync bridge resolves the envelope before returning; the async bridge
//! resolves it from a background task, retrying failed destinations with a
//! fixed wait between rounds. Destination success is sticky within a batch:
//! once a destination accepts, it is not called again for that batch.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    context::Context,
    destination::Destination,
    envelope::Envelope,
    message::Message,
};

/// Accepts a batch and returns a completion handle for it.
#[async_trait]
pub(crate) trait Bridge: Send + Sync {
    async fn take(&self, cx: &Context, batch: Vec<Message>) -> Envelope;
}

/// Visits every destination in order and resolves inline.
pub(crate) struct SyncBridge {
    destinations: Vec<Arc<dyn Destination>>,
}

impl SyncBridge {
    pub(crate) fn new(destinations: Vec<Arc<dyn Destination>>) -> Self {
        Self { destinations }
    }
}

#[async_trait]
impl Bridge for SyncBridge {
    async fn take(&self, cx: &Context, batch: Vec<Message>) -> Envelope {
        let envelope = Envelope::new();
        let mut last_error = None;
        // All destinations are attempted even after a failure; the envelope
        // carries the last error seen.
        for (index, destination) in self.destinations.iter().enumerate() {
            if let Err(error) = destination.deliver(cx, &batch).await {
                warn!(destination = index, error = %error, "destination rejected batch");
                last_error = Some(error);
            }
        }
        match last_error {
            Some(error) => envelope.close_failure(error),
            None => envelope.close_success(),
        }
        envelope
    }
}

/// Retries destinations from a background task until all accept or the
/// attempt budget is spent.
pub(crate) struct AsyncBridge {
    destinations: Vec<Arc<dyn Destination>>,
    max_attempts: u32,
    wait_between: Duration,
}

impl AsyncBridge {
    pub(crate) fn new(
        max_attempts: u32,
        wait_between: Duration,
        destinations: Vec<Arc<dyn Destination>>,
    ) -> Self {
        Self { destinations, max_attempts, wait_between }
    }
}

#[async_trait]
impl Bridge for AsyncBridge {
    async fn take(&self, cx: &Context, batch: Vec<Message>) -> Envelope {
        let envelope = Envelope::new();
        let task = AsyncDelivery {
            pending: self.destinations.clone(),
            max_attempts: self.max_attempts,
            wait_between: self.wait_between,
            cx: cx.clone(),
            batch,
            envelope: envelope.clone(),
        };
        tokio::spawn(task.run());
        envelope
    }
}

struct AsyncDelivery {
    pending: Vec<Arc<dyn Destination>>,
    max_attempts: u32,
    wait_between: Duration,
    cx: Context,
    batch: Vec<Message>,
    envelope: Envelope,
}

impl AsyncDelivery {
    async fn run(mut self) {
        let mut attempts_left = self.max_attempts;
        while attempts_left > 0 {
            attempts_left -= 1;
            let mut still_pending = Vec::new();
            let mut last_error = None;
            for destination in self.pending {
                match destination.deliver(&self.cx, &self.batch).await {
                    Ok(()) => {},
                    Err(error) => {
                        debug!(error = %error, attempts_left, "destination rejected batch");
                        last_error = Some(error);
                        still_pending.push(destination);
                    },
                }
            }
            self.pending = still_pending;
            if self.pending.is_empty() {
                self.envelope.close_success();
                return;
            }
            if attempts_left > 0 {
                tokio::time::sleep(self.wait_between).await;
            } else {
                warn!(
                    pending = self.pending.len(),
                    max_attempts = self.max_attempts,
                    "delivery attempts exhausted"
                );
                self.envelope.close_failure(last_error.unwrap_or_else(|| {
                    anyhow::anyhow!("delivery attempts exhausted")
                }));
                return;
            }
        }
        // Only reachable with a zero attempt budget.
        self.envelope.close_failure(anyhow::anyhow!("no delivery attempts configured"));
    }
}
