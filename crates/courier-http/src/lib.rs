//! HTTP adapters for the courier delivery pipeline.
//!
//! The destination POSTs message JSON to an endpoint; the receive router is
//! an HTTP inbox that decodes a message body and dispatches it into a
//! [`courier_core::Receiver`]. Neither layer retries: the bridge owns
//! publisher-side retries, and an HTTP caller owns its own.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod destination;
pub mod receive;

pub use destination::HttpDestination;
pub use receive::receive_router;
