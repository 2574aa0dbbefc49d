//! Invariant checks over persisted event rows.
//!
//! Tests call these after driving a scenario to assert that the guarantees
//! of the delivery pipeline held regardless of how the scenario interleaved:
//! valid states, idempotent inserts, bounded and honest attempt counters.

use std::collections::HashSet;

use anyhow::{ensure, Result};

use crate::database::EventRow;

/// Row-level invariants that must hold after any scenario.
pub struct Invariants;

impl Invariants {
    /// Runs every row-level check.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn check_all(rows: &[EventRow]) -> Result<()> {
        Self::states_are_valid(rows)?;
        Self::idempotent_per_queue(rows)?;
        Self::terminal_rows_were_attempted(rows)?;
        Self::delivery_never_precedes_publication(rows)?;
        Ok(())
    }

    /// Every row is `pending`, `processed`, or `dropped`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending row.
    pub fn states_are_valid(rows: &[EventRow]) -> Result<()> {
        for row in rows {
            ensure!(
                matches!(row.status.as_str(), "pending" | "processed" | "dropped"),
                "row {} in queue {} has unknown status {:?}",
                row.uuid,
                row.queue,
                row.status
            );
        }
        Ok(())
    }

    /// At most one row exists per `(queue, uuid)` pair.
    ///
    /// # Errors
    ///
    /// Returns an error naming the duplicated pair.
    pub fn idempotent_per_queue(rows: &[EventRow]) -> Result<()> {
        let mut seen = HashSet::new();
        for row in rows {
            ensure!(
                seen.insert((row.queue.as_str(), row.uuid.as_str())),
                "duplicate row for queue {} and uuid {}",
                row.queue,
                row.uuid
            );
        }
        Ok(())
    }

    /// Attempt counters never exceed `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending row.
    pub fn attempts_are_bounded(rows: &[EventRow], limit: i32) -> Result<()> {
        for row in rows {
            ensure!(
                row.delivery_attempts <= limit,
                "row {} in queue {} recorded {} attempts, limit is {}",
                row.uuid,
                row.queue,
                row.delivery_attempts,
                limit
            );
        }
        Ok(())
    }

    /// Rows that left `pending` were actually attempted.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending row.
    pub fn terminal_rows_were_attempted(rows: &[EventRow]) -> Result<()> {
        for row in rows {
            if row.status != "pending" {
                ensure!(
                    row.delivery_attempts >= 1,
                    "row {} in queue {} is {} with no recorded attempts",
                    row.uuid,
                    row.queue,
                    row.status
                );
            }
        }
        Ok(())
    }

    /// `deliver_at` never precedes `published_at`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending row.
    pub fn delivery_never_precedes_publication(rows: &[EventRow]) -> Result<()> {
        for row in rows {
            ensure!(
                row.deliver_at >= row.published_at,
                "row {} in queue {} is deliverable at {} before its publication at {}",
                row.uuid,
                row.queue,
                row.deliver_at,
                row.published_at
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn row(queue: &str, uuid: &str, status: &str, attempts: i32) -> EventRow {
        let published_at = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
        EventRow {
            uuid: uuid.to_string(),
            queue: queue.to_string(),
            status: status.to_string(),
            delivery_attempts: attempts,
            published_at,
            deliver_at: published_at,
        }
    }

    #[test]
    fn valid_rows_pass_every_check() {
        let rows =
            vec![row("q1", "u1", "processed", 1), row("q2", "u1", "pending", 0)];
        Invariants::check_all(&rows).unwrap();
    }

    #[test]
    fn duplicate_pairs_are_detected() {
        let rows = vec![row("q1", "u1", "pending", 0), row("q1", "u1", "pending", 0)];
        assert!(Invariants::idempotent_per_queue(&rows).is_err());
    }

    #[test]
    fn unattempted_terminal_rows_are_detected() {
        let rows = vec![row("q1", "u1", "dropped", 0)];
        assert!(Invariants::terminal_rows_were_attempted(&rows).is_err());
    }

    #[test]
    fn early_delivery_times_are_detected() {
        let mut bad = row("q1", "u1", "pending", 0);
        bad.deliver_at = bad.published_at - chrono::Duration::seconds(1);
        assert!(Invariants::delivery_never_precedes_publication(std::slice::from_ref(&bad))
            .is_err());
    }

    #[test]
    fn attempt_bound_is_enforced() {
        let rows = vec![row("q1", "u1", "processed", 4)];
        assert!(Invariants::attempts_are_bounded(&rows, 3).is_err());
        Invariants::attempts_are_bounded(&rows, 4).unwrap();
    }
}
