//! A destination with scripted outcomes for bridge and publisher tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use courier_core::{Context, Destination, Message};

type ScriptedDelivery = Box<dyn FnOnce(&[Message]) -> anyhow::Result<()> + Send>;

/// A destination that replays scripted outcomes in order.
///
/// Each delivery consumes the next scripted outcome; running past the
/// script is an error, which keeps tests honest about how many calls they
/// expect. Batches are recorded for later assertions.
#[derive(Default)]
pub struct TestDestination {
    script: Mutex<VecDeque<ScriptedDelivery>>,
    batches: Mutex<Vec<Vec<Message>>>,
    deliveries: AtomicU32,
}

impl TestDestination {
    /// Creates a destination with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts one successful delivery.
    pub fn push_success(&self) {
        self.push_handler(|_| Ok(()));
    }

    /// Scripts one failed delivery.
    pub fn push_failure(&self, reason: &str) {
        let reason = reason.to_string();
        self.push_handler(move |_| Err(anyhow!(reason)));
    }

    /// Scripts one delivery with a custom outcome.
    pub fn push_handler(&self, f: impl FnOnce(&[Message]) -> anyhow::Result<()> + Send + 'static) {
        self.script.lock().expect("script lock poisoned").push_back(Box::new(f));
    }

    /// Number of deliveries attempted so far.
    pub fn deliveries(&self) -> u32 {
        self.deliveries.load(Ordering::SeqCst)
    }

    /// Every batch delivered so far, in order.
    pub fn batches(&self) -> Vec<Vec<Message>> {
        self.batches.lock().expect("batches lock poisoned").clone()
    }
}

#[async_trait]
impl Destination for TestDestination {
    async fn deliver(&self, _cx: &Context, batch: &[Message]) -> anyhow::Result<()> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().expect("batches lock poisoned").push(batch.to_vec());
        let next = self
            .script
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted deliveries left"))?;
        next(batch)
    }
}
