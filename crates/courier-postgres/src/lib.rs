//! PostgreSQL adapters for the courier delivery pipeline.
//!
//! Implements the transactional outbox destination, the polling/notify
//! source with a `FOR UPDATE SKIP LOCKED` worker pool, topic → queue
//! routing, and the embedded schema migrator. Built on `sqlx`; all state
//! lives in the configured schema (default `opinionatedevents`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod destination;
pub mod error;
pub mod migrate;
pub mod routing;
pub mod source;
pub mod triggers;
pub mod tx;

pub use config::{notify_channel, EventColumns, EventsTable, DEFAULT_SCHEMA};
pub use destination::{DestinationConfig, PostgresDestination};
pub use error::PgError;
pub use migrate::migrate;
pub use routing::{DeclaredRouting, Routing, StaticRouting};
pub use source::{PostgresSource, SourceConfig, SourceStats};
pub use triggers::{IntervalTrigger, NotifyTrigger, Trigger};
pub use tx::{with_tx, SharedTransaction};
