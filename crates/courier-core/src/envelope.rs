//! One-shot completion broadcasting for in-flight batches.
//!
//! An envelope is handed out by a bridge for every batch it accepts. The
//! bridge closes it exactly once with the batch outcome; any number of
//! observers, subscribed before or after the close, each see that outcome
//! exactly once. Close and subscribe may race from any task.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// The terminal outcome of a batch delivery.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// Every destination accepted the batch.
    Success,
    /// The bridge gave up; carries the last destination error.
    Failure(Arc<anyhow::Error>),
}

impl DeliveryOutcome {
    /// Whether the batch was delivered to all destinations.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A one-shot, broadcast completion handle for an outstanding delivery.
///
/// Cloning is cheap and clones share the same completion state.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    inner: Arc<Mutex<EnvelopeState>>,
}

#[derive(Debug, Default)]
struct EnvelopeState {
    closed_with: Option<DeliveryOutcome>,
    observers: Vec<oneshot::Sender<DeliveryOutcome>>,
}

impl Envelope {
    /// Creates an open envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes the envelope as successful. No-op if already closed.
    pub fn close_success(&self) {
        self.close_with(DeliveryOutcome::Success);
    }

    /// Closes the envelope as failed. No-op if already closed.
    pub fn close_failure(&self, error: anyhow::Error) {
        self.close_with(DeliveryOutcome::Failure(Arc::new(error)));
    }

    fn close_with(&self, outcome: DeliveryOutcome) {
        let mut state = self.inner.lock().expect("envelope state lock poisoned");
        if state.closed_with.is_some() {
            return;
        }
        state.closed_with = Some(outcome.clone());
        // Observers are notified in subscription order.
        for observer in state.observers.drain(..) {
            let _ = observer.send(outcome.clone());
        }
    }

    /// Registers an observer for the envelope's outcome.
    ///
    /// If the envelope is already closed, the receiver resolves immediately.
    pub fn subscribe(&self) -> oneshot::Receiver<DeliveryOutcome> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.inner.lock().expect("envelope state lock poisoned");
        match &state.closed_with {
            Some(outcome) => {
                let _ = sender.send(outcome.clone());
            },
            None => state.observers.push(sender),
        }
        receiver
    }

    /// Waits for the envelope's outcome.
    ///
    /// An envelope abandoned without a close resolves as a failure rather
    /// than hanging its observers.
    pub async fn wait(&self) -> DeliveryOutcome {
        match self.subscribe().await {
            Ok(outcome) => outcome,
            Err(_) => {
                DeliveryOutcome::Failure(Arc::new(anyhow::anyhow!(
                    "envelope dropped before completion"
                )))
            },
        }
    }

    /// The outcome, if the envelope has been closed.
    pub fn outcome(&self) -> Option<DeliveryOutcome> {
        self.inner.lock().expect("envelope state lock poisoned").closed_with.clone()
    }

    /// Whether the envelope has been closed.
    pub fn is_closed(&self) -> bool {
        self.outcome().is_some()
    }
}
