//! The transactional outbox destination.
//!
//! Inserts one event row per `(message, queue)` pair, `pending` with zero
//! delivery attempts, inside either a library-managed transaction or the
//! caller's ambient one. Duplicate `(queue, uuid)` pairs are swallowed with
//! `ON CONFLICT DO NOTHING`, which is what makes republication idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{Context, Destination, Message};
use sqlx::{PgConnection, PgPool, QueryBuilder};
use tracing::debug;

use crate::{
    config::{EventsTable, DEFAULT_SCHEMA},
    error::{PgError, Result},
    migrate::migrate,
    routing::{DeclaredRouting, Routing, StaticRouting},
    tx::ambient_tx,
};

/// Rows per multi-value insert statement.
const INSERT_CHUNK_ROWS: usize = 128;

/// Configuration for [`PostgresDestination`].
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    /// Schema holding the event store.
    pub schema: String,
    /// Events table naming.
    pub events: EventsTable,
    /// Skip running migrations on connect.
    pub skip_migrations: bool,
    static_routes: StaticRouting,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            events: EventsTable::default(),
            skip_migrations: false,
            static_routes: StaticRouting::new(),
        }
    }
}

impl DestinationConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a different schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Renames the events table.
    #[must_use]
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.events.name = name.into();
        self
    }

    /// Routes a topic to the given queues with an in-memory table.
    ///
    /// Configuring any static route switches the destination from the
    /// persisted routing table to the in-memory one, which falls back to
    /// the `default` queue for unknown topics.
    #[must_use]
    pub fn with_topic_to_queues<I, Q>(mut self, topic: impl Into<String>, queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.static_routes.add(topic, queues);
        self
    }

    /// Skips the migration run on connect.
    #[must_use]
    pub fn skip_migrations(mut self) -> Self {
        self.skip_migrations = true;
        self
    }
}

/// A [`Destination`] persisting messages into the outbox table.
pub struct PostgresDestination {
    pool: PgPool,
    table: String,
    insert_columns: String,
    conflict_columns: String,
    routing: Arc<dyn Routing>,
}

impl PostgresDestination {
    /// Connects the destination, running migrations unless skipped.
    ///
    /// # Errors
    ///
    /// Returns the driver error when migrations fail.
    pub async fn connect(pool: PgPool, config: DestinationConfig) -> Result<Self> {
        if !config.skip_migrations {
            migrate(&pool, &config.schema).await?;
        }
        let routing: Arc<dyn Routing> = if config.static_routes.is_empty() {
            Arc::new(DeclaredRouting::new(&config.schema))
        } else {
            Arc::new(config.static_routes.clone())
        };
        let columns = &config.events.columns;
        Ok(Self {
            pool,
            table: config.events.qualified(&config.schema),
            insert_columns: format!(
                "{}, {}, {}, {}, {}, {}, {}, {}",
                columns.status,
                columns.topic,
                columns.queue,
                columns.published_at,
                columns.deliver_at,
                columns.uuid,
                columns.name,
                columns.payload,
            ),
            conflict_columns: format!("{}, {}", columns.queue, columns.uuid),
            routing,
        })
    }

    async fn insert_batch(&self, conn: &mut PgConnection, batch: &[Message]) -> Result<()> {
        let mut rows = Vec::new();
        for message in batch {
            let payload = message.encode()?;
            let Some(published_at) = message.published_at() else {
                return Err(courier_core::Error::InvalidMessage(
                    "message has not been stamped with a publish time".to_string(),
                )
                .into());
            };
            let deliver_at = message.deliver_at().unwrap_or(published_at);
            for queue in self.routing.queues_for(&mut *conn, message.topic()).await? {
                rows.push(EventRow {
                    topic: message.topic().to_string(),
                    queue,
                    published_at,
                    deliver_at,
                    uuid: message.uuid().to_string(),
                    name: message.name().to_string(),
                    payload: payload.clone(),
                });
            }
        }

        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<'_, sqlx::Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", self.table, self.insert_columns));
            builder.push_values(chunk, |mut values, row| {
                values
                    .push_bind("pending")
                    .push_bind(&row.topic)
                    .push_bind(&row.queue)
                    .push_bind(row.published_at)
                    .push_bind(row.deliver_at)
                    .push_bind(&row.uuid)
                    .push_bind(&row.name)
                    .push_bind(&row.payload);
            });
            builder.push(format!(" ON CONFLICT ({}) DO NOTHING", self.conflict_columns));
            builder.build().execute(&mut *conn).await.map_err(PgError::from)?;
        }

        debug!(table = %self.table, rows = rows.len(), batch = batch.len(), "outbox insert");
        Ok(())
    }
}

struct EventRow {
    topic: String,
    queue: String,
    published_at: DateTime<Utc>,
    deliver_at: DateTime<Utc>,
    uuid: String,
    name: String,
    payload: Vec<u8>,
}

#[async_trait]
impl Destination for PostgresDestination {
    async fn deliver(&self, cx: &Context, batch: &[Message]) -> anyhow::Result<()> {
        match ambient_tx(cx) {
            Some(shared) => {
                // Caller-owned transaction: execute inside it, never commit
                // or roll back.
                let mut guard = shared.lock().await;
                let tx = guard.as_mut().ok_or(PgError::TransactionCompleted)?;
                self.insert_batch(&mut *tx, batch).await?;
                Ok(())
            },
            None => {
                let mut tx = self.pool.begin().await.map_err(PgError::from)?;
                self.insert_batch(&mut tx, batch).await?;
                tx.commit().await.map_err(PgError::from)?;
                Ok(())
            },
        }
    }
}
