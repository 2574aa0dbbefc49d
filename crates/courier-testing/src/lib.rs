//! Test infrastructure for the courier crates.
//!
//! Provides an environment-gated test database with per-test schema
//! isolation, a scripted destination for exercising bridges, and a manual
//! clock for deterministic scheduling assertions. Database-backed tests
//! skip cleanly when `COURIER_TEST_DATABASE_URL` is unset.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;
pub mod destination;
pub mod invariants;
pub mod time;

pub use database::{EventRow, TestDatabase};
pub use destination::TestDestination;
pub use invariants::Invariants;
pub use time::TestClock;
