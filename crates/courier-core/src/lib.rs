//! Core primitives for transactional event messaging.
//!
//! Provides the message value object, the publisher-side delivery pipeline
//! (bridges, envelopes, destinations) and the consumer-side dispatch table
//! (receiver, handler middleware, backoff curves). Storage adapters build on
//! these types; this crate has no database dependency of its own.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod context;
pub mod destination;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod message;
pub mod middleware;
pub mod publisher;
pub mod receiver;
pub mod time;

mod bridge;

pub use backoff::{Backoff, ConstantBackoff, ExponentialBackoff, LinearBackoff};
pub use context::Context;
pub use destination::Destination;
pub use envelope::{DeliveryOutcome, Envelope};
pub use error::{Error, Result};
pub use handler::{HandlerError, HandlerResult};
pub use message::Message;
pub use middleware::{with_backoff, with_limit};
pub use publisher::{FailureObserverGuard, Publisher, PublisherBuilder};
pub use receiver::{handler, Delivery, Handler, Receiver};
pub use time::{Clock, SystemClock};
