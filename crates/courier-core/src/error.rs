//! Error taxonomy for the messaging pipeline.
//!
//! Construction-time errors (invalid names, duplicate registrations,
//! misconfigured publishers) surface to the caller immediately. Delivery
//! failures are observed through the envelope and reported here only when
//! the publisher resolves a batch synchronously.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the messaging pipeline itself.
///
/// Handler outcomes are deliberately a separate type
/// ([`crate::HandlerError`]): they describe a per-message decision made by
/// user code, not a failure of the library.
#[derive(Debug, Error)]
pub enum Error {
    /// Message name does not match `<topic>.<event>`.
    #[error(
        "invalid message name {name:?}: expected <topic>.<event> with \
         alphanumeric, underscore, or dash segments"
    )]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// Message could not be encoded or decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A handler is already registered for this `(queue, name)` pair.
    #[error("handler already registered for queue {queue:?} and message {name:?}")]
    DuplicateHandler {
        /// Queue of the conflicting registration.
        queue: String,
        /// Message name of the conflicting registration.
        name: String,
    },

    /// A delivery arrived for a `(queue, name)` pair with no handler.
    ///
    /// The source narrows its queries to registered names, so hitting this
    /// is a programming error in the wiring rather than a runtime condition.
    #[error("no handler registered for queue {queue:?} and message {name:?}")]
    MissingHandler {
        /// Queue the delivery was pulled from.
        queue: String,
        /// Message name of the delivery.
        name: String,
    },

    /// Publisher was built without exactly one bridge.
    #[error("publisher bridge misconfigured: {0}")]
    BridgeMisconfigured(&'static str),

    /// A destination rejected the batch and the bridge gave up.
    #[error("message delivery failed: {0}")]
    DeliveryFailure(Arc<anyhow::Error>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_failure_preserves_cause() {
        let error = Error::DeliveryFailure(Arc::new(anyhow::anyhow!("endpoint returned 503")));
        assert!(error.to_string().contains("endpoint returned 503"));
    }

    #[test]
    fn missing_handler_names_the_pair() {
        let error = Error::MissingHandler { queue: "q1".into(), name: "customers.created".into() };
        let rendered = error.to_string();
        assert!(rendered.contains("q1"));
        assert!(rendered.contains("customers.created"));
    }
}
