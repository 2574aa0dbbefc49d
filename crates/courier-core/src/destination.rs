//! The terminal sink capability for message batches.

use async_trait::async_trait;

use crate::{context::Context, message::Message};

/// A terminal sink for batches of messages.
///
/// Atomicity is destination-specific: a transactional store may persist the
/// batch atomically, an HTTP endpoint may not. Implementations must be safe
/// for concurrent use; bridges may call `deliver` from multiple tasks.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Delivers a batch of messages.
    ///
    /// # Errors
    ///
    /// Any error means the batch was not (fully) accepted; the bridge owns
    /// the retry decision.
    async fn deliver(&self, cx: &Context, batch: &[Message]) -> anyhow::Result<()>;
}
