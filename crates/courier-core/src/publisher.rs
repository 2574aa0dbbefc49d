//! The publisher: timestamp stamping, in-flight tracking, failure fan-out.
//!
//! `publish` returns as soon as the bridge has accepted the batch. When the
//! bridge resolves synchronously the outcome is handled inline; otherwise a
//! small waiter task observes the envelope, keeps the in-flight counter
//! honest, and fans out failure callbacks.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use tokio::sync::Notify;
use tracing::warn;

use crate::{
    bridge::{AsyncBridge, Bridge, SyncBridge},
    context::Context,
    destination::Destination,
    envelope::DeliveryOutcome,
    error::{Error, Result},
    message::Message,
    time::{Clock, SystemClock},
};

type FailureCallback = Arc<dyn Fn(&[Message]) + Send + Sync>;

struct FailureObserver {
    id: u64,
    callback: FailureCallback,
}

/// Publishes batches of messages through a configured bridge.
pub struct Publisher {
    bridge: Arc<dyn Bridge>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<InFlight>,
    failure_observers: Arc<Mutex<Vec<FailureObserver>>>,
    next_observer_id: AtomicU64,
}

impl Publisher {
    /// Starts configuring a publisher.
    pub fn builder() -> PublisherBuilder {
        PublisherBuilder::default()
    }

    /// Publishes a single message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeliveryFailure`] when the bridge resolves the batch
    /// synchronously and it failed. Asynchronous failures are reported to
    /// [`Publisher::on_delivery_failure`] observers instead.
    pub async fn publish(&self, cx: &Context, message: Message) -> Result<()> {
        self.publish_many(cx, vec![message]).await
    }

    /// Publishes a batch of messages as one delivery unit.
    ///
    /// Unstamped messages receive the current time as their publish time and
    /// default their delivery time to it.
    ///
    /// # Errors
    ///
    /// See [`Publisher::publish`].
    pub async fn publish_many(&self, cx: &Context, mut messages: Vec<Message>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        for message in &mut messages {
            message.stamp(now);
        }

        self.in_flight.enter();
        let envelope = self.bridge.take(cx, messages.clone()).await;

        if let Some(outcome) = envelope.outcome() {
            // Resolved synchronously: settle inline.
            self.in_flight.exit();
            if let DeliveryOutcome::Failure(error) = outcome {
                self.notify_failure(&messages);
                return Err(Error::DeliveryFailure(error));
            }
            return Ok(());
        }

        let in_flight = Arc::clone(&self.in_flight);
        let observers = Arc::clone(&self.failure_observers);
        tokio::spawn(async move {
            let outcome = envelope.wait().await;
            in_flight.exit();
            if let DeliveryOutcome::Failure(error) = outcome {
                warn!(error = %error, batch_size = messages.len(), "background delivery failed");
                let observers = observers.lock().expect("failure observer lock poisoned");
                for observer in observers.iter() {
                    (observer.callback)(&messages);
                }
            }
        });
        Ok(())
    }

    /// Blocks until every accepted batch has resolved.
    pub async fn drain(&self) {
        self.in_flight.wait_empty().await;
    }

    /// Registers a callback invoked with each batch that ultimately fails.
    ///
    /// The returned guard removes exactly this registration when
    /// [`FailureObserverGuard::unregister`] is called; dropping the guard
    /// leaves the callback in place.
    pub fn on_delivery_failure(
        &self,
        callback: impl Fn(&[Message]) + Send + Sync + 'static,
    ) -> FailureObserverGuard {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let mut observers = self.failure_observers.lock().expect("failure observer lock poisoned");
        observers.push(FailureObserver { id, callback: Arc::new(callback) });
        FailureObserverGuard { id, observers: Arc::downgrade(&self.failure_observers) }
    }

    fn notify_failure(&self, batch: &[Message]) {
        let observers = self.failure_observers.lock().expect("failure observer lock poisoned");
        for observer in observers.iter() {
            (observer.callback)(batch);
        }
    }
}

/// Removes a failure observer registered with
/// [`Publisher::on_delivery_failure`].
#[derive(Debug)]
pub struct FailureObserverGuard {
    id: u64,
    observers: Weak<Mutex<Vec<FailureObserver>>>,
}

impl FailureObserverGuard {
    /// Unregisters the observer this guard was returned for.
    pub fn unregister(self) {
        if let Some(observers) = self.observers.upgrade() {
            let mut observers = observers.lock().expect("failure observer lock poisoned");
            observers.retain(|observer| observer.id != self.id);
        }
    }
}

impl std::fmt::Debug for FailureObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureObserver").field("id", &self.id).finish()
    }
}

/// Tracks batches accepted but not yet resolved.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    drained: Notify,
}

impl InFlight {
    fn enter(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn exit(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn wait_empty(&self) {
        loop {
            // Register interest before the check so an exit between the two
            // cannot be missed.
            let drained = self.drained.notified();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Configures and builds a [`Publisher`].
///
/// Exactly one bridge must be configured; anything else fails at build time
/// with [`Error::BridgeMisconfigured`].
#[derive(Default)]
pub struct PublisherBuilder {
    bridge: Option<Arc<dyn Bridge>>,
    misconfiguration: Option<&'static str>,
    clock: Option<Arc<dyn Clock>>,
}

impl PublisherBuilder {
    /// Uses a synchronous bridge over the given destinations.
    #[must_use]
    pub fn sync_bridge(mut self, destinations: Vec<Arc<dyn Destination>>) -> Self {
        self.set_bridge(Arc::new(SyncBridge::new(destinations)));
        self
    }

    /// Uses an asynchronous bridge with a per-destination retry budget.
    ///
    /// Attempt counting is inclusive: with `max_attempts = N` a destination
    /// is called at most `N` times for one batch.
    #[must_use]
    pub fn async_bridge(
        mut self,
        max_attempts: u32,
        wait_between: Duration,
        destinations: Vec<Arc<dyn Destination>>,
    ) -> Self {
        self.set_bridge(Arc::new(AsyncBridge::new(max_attempts, wait_between, destinations)));
        self
    }

    /// Overrides the clock used to stamp publish times.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the publisher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BridgeMisconfigured`] when no bridge, or more than
    /// one bridge, was configured.
    pub fn build(self) -> Result<Publisher> {
        if let Some(reason) = self.misconfiguration {
            return Err(Error::BridgeMisconfigured(reason));
        }
        let bridge = self
            .bridge
            .ok_or(Error::BridgeMisconfigured("a sync or async bridge is required"))?;
        Ok(Publisher {
            bridge,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            in_flight: Arc::new(InFlight::default()),
            failure_observers: Arc::new(Mutex::new(Vec::new())),
            next_observer_id: AtomicU64::new(0),
        })
    }

    fn set_bridge(&mut self, bridge: Arc<dyn Bridge>) {
        if self.bridge.is_some() {
            self.misconfiguration = Some("cannot configure more than one bridge");
        } else {
            self.bridge = Some(bridge);
        }
    }
}
