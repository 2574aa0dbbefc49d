//! The process-local dispatch table for incoming deliveries.
//!
//! Handlers are registered per `(queue, message name)` pair during setup;
//! after a source starts the registry is only read. The registry also tells
//! the source which queues and names are worth querying at all.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;

use crate::{
    context::Context,
    error::{Error, Result},
    handler::HandlerResult,
    message::Message,
};

/// A single dispatch attempt of a persisted message.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The queue the message was pulled from.
    pub queue: String,
    /// 1-based attempt number, counting this attempt.
    pub attempt: u32,
    /// The decoded message.
    pub message: Message,
}

/// A registered message handler.
pub type Handler = Arc<dyn Fn(Context, Delivery) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wraps an async function into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context, Delivery) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |cx, delivery| Box::pin(f(cx, delivery)))
}

/// Registry and dispatcher of handlers, keyed by `(queue, name)`.
#[derive(Default)]
pub struct Receiver {
    handlers: HashMap<String, HashMap<String, Handler>>,
}

impl Receiver {
    /// Creates an empty receiver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for messages named `name` on `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] when the pair is already taken.
    pub fn on(
        &mut self,
        queue: impl Into<String>,
        name: impl Into<String>,
        handler: Handler,
    ) -> Result<()> {
        let queue = queue.into();
        let name = name.into();
        let by_name = self.handlers.entry(queue.clone()).or_default();
        if by_name.contains_key(&name) {
            return Err(Error::DuplicateHandler { queue, name });
        }
        by_name.insert(name, handler);
        Ok(())
    }

    /// Queues with at least one registered handler, sorted.
    pub fn queues_with_handlers(&self) -> Vec<String> {
        let mut queues: Vec<String> = self.handlers.keys().cloned().collect();
        queues.sort();
        queues
    }

    /// Message names with a handler on the given queue, sorted.
    pub fn messages_with_handlers(&self, queue: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .get(queue)
            .map(|by_name| by_name.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Dispatches a delivery to its registered handler.
    ///
    /// The outer result reports a dispatch problem; the inner result is the
    /// handler's own verdict on the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHandler`] when no handler is registered for
    /// the delivery's `(queue, name)` pair. A source narrows its queries to
    /// registered names, so this indicates broken wiring.
    pub async fn deliver(&self, cx: &Context, delivery: Delivery) -> Result<HandlerResult> {
        let Some(handler) = self
            .handlers
            .get(&delivery.queue)
            .and_then(|by_name| by_name.get(delivery.message.name()))
        else {
            return Err(Error::MissingHandler {
                queue: delivery.queue.clone(),
                name: delivery.message.name().to_string(),
            });
        };
        Ok(handler(cx.clone(), delivery).await)
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver").field("queues", &self.queues_with_handlers()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn delivery(queue: &str, name: &str) -> Delivery {
        Delivery {
            queue: queue.to_string(),
            attempt: 1,
            message: Message::new(name, Vec::new()).unwrap(),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut receiver = Receiver::new();
        receiver.on("q1", "customers.created", handler(|_, _| async { Ok(()) })).unwrap();
        let duplicate = receiver.on("q1", "customers.created", handler(|_, _| async { Ok(()) }));
        assert!(matches!(duplicate, Err(Error::DuplicateHandler { .. })));
    }

    #[test]
    fn same_name_on_different_queues_is_allowed() {
        let mut receiver = Receiver::new();
        receiver.on("q1", "customers.created", handler(|_, _| async { Ok(()) })).unwrap();
        receiver.on("q2", "customers.created", handler(|_, _| async { Ok(()) })).unwrap();
        assert_eq!(receiver.queues_with_handlers(), vec!["q1", "q2"]);
    }

    #[test]
    fn registry_queries_are_sorted_and_scoped() {
        let mut receiver = Receiver::new();
        receiver.on("q1", "orders.shipped", handler(|_, _| async { Ok(()) })).unwrap();
        receiver.on("q1", "customers.created", handler(|_, _| async { Ok(()) })).unwrap();
        receiver.on("q2", "orders.shipped", handler(|_, _| async { Ok(()) })).unwrap();

        assert_eq!(receiver.messages_with_handlers("q1"), vec![
            "customers.created",
            "orders.shipped"
        ]);
        assert_eq!(receiver.messages_with_handlers("q2"), vec!["orders.shipped"]);
        assert!(receiver.messages_with_handlers("unknown").is_empty());
    }

    #[tokio::test]
    async fn deliver_invokes_the_matching_handler() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut receiver = Receiver::new();
        {
            let calls = Arc::clone(&calls);
            receiver
                .on(
                    "q1",
                    "customers.created",
                    handler(move |_, _| {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                )
                .unwrap();
        }

        let outcome =
            receiver.deliver(&Context::new(), delivery("q1", "customers.created")).await.unwrap();
        assert!(outcome.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deliver_without_handler_is_a_typed_error() {
        let receiver = Receiver::new();
        let result = receiver.deliver(&Context::new(), delivery("q1", "customers.created")).await;
        assert!(matches!(result, Err(Error::MissingHandler { .. })));
    }
}
