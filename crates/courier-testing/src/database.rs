//! Environment-gated test database with schema-per-test isolation.
//!
//! Each handle owns a freshly named schema, so tests sharing one database
//! never see each other's rows. Tests call [`TestDatabase::connect`] and
//! return early when it yields `None`, which keeps the suite green on
//! machines without a database.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

/// Environment variable naming the database to run against.
pub const DATABASE_URL_ENV: &str = "COURIER_TEST_DATABASE_URL";

/// A pooled connection plus a schema reserved for one test.
pub struct TestDatabase {
    pool: PgPool,
    schema: String,
}

impl TestDatabase {
    /// Connects to the test database, if one is configured.
    ///
    /// Returns `None` (after printing a notice) when
    /// `COURIER_TEST_DATABASE_URL` is unset, so callers can skip.
    ///
    /// # Errors
    ///
    /// Returns the connection error when the database is configured but
    /// unreachable.
    pub async fn connect() -> Result<Option<Self>> {
        let Ok(url) = std::env::var(DATABASE_URL_ENV) else {
            eprintln!("{DATABASE_URL_ENV} is not set; skipping database-backed test");
            return Ok(None);
        };
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .with_context(|| format!("connecting to {DATABASE_URL_ENV}"))?;
        let schema = format!("courier_test_{}", Uuid::new_v4().simple());
        Ok(Some(Self { pool, schema }))
    }

    /// The shared connection pool.
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// The schema reserved for this test.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// The connection string, for components that dial themselves.
    pub fn url(&self) -> String {
        std::env::var(DATABASE_URL_ENV).unwrap_or_default()
    }

    /// All event rows in this test's schema, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the query fails.
    pub async fn event_rows(&self) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as(&format!(
            "SELECT uuid, queue, status, delivery_attempts, published_at, deliver_at \
             FROM {}.events ORDER BY id",
            self.schema
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Drops this test's schema and everything in it.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the drop fails.
    pub async fn drop_schema(&self) -> Result<()> {
        sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// A persisted event row, as tests observe it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Message UUID, as stored.
    pub uuid: String,
    /// Queue the row belongs to.
    pub queue: String,
    /// `pending`, `processed`, or `dropped`.
    pub status: String,
    /// Attempts recorded so far.
    pub delivery_attempts: i32,
    /// When the message was published.
    pub published_at: DateTime<Utc>,
    /// Earliest next delivery.
    pub deliver_at: DateTime<Utc>,
}
