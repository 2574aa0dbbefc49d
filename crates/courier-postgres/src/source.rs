//! The polling/notify source: claims pending rows and dispatches them.
//!
//! Workers share one trigger stream fanned out to per-worker channels. Each
//! worker coalesces ticks into at most one running batch pass; a pass claims
//! rows one at a time under `FOR UPDATE SKIP LOCKED`, dispatches them to the
//! receiver, and records the outcome in the same transaction as the claim.
//! Rows are disjoint across workers by construction, so adding workers adds
//! throughput without coordination.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use courier_core::{Clock, Context, Delivery, Message, Receiver, SystemClock};
use rand::Rng;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::{EventsTable, DEFAULT_SCHEMA},
    error::{PgError, Result},
    migrate::migrate,
    triggers::{AggregateTrigger, IntervalTrigger, NotifyTrigger, Trigger},
};

/// Maximum rows one batch pass may claim before yielding.
const PASS_CLAIM_LIMIT: usize = 500;

/// Default interval trigger when none is configured.
const DEFAULT_TRIGGER_INTERVAL: Duration = Duration::from_secs(5);

/// Default retry delay in seconds when a retryable error names no instant.
const DEFAULT_RETRY_DELAY_SECS: i64 = 30;

/// Configuration for [`PostgresSource`].
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Schema holding the event store.
    pub schema: String,
    /// Events table naming.
    pub events: EventsTable,
    /// Number of concurrent workers.
    pub max_workers: usize,
    /// Skip running migrations on connect.
    pub skip_migrations: bool,
    triggers: Vec<TriggerSpec>,
}

#[derive(Debug, Clone)]
enum TriggerSpec {
    Interval(Duration),
    Notify { url: String, channel: String },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            events: EventsTable::default(),
            max_workers: 8,
            skip_migrations: false,
            triggers: Vec::new(),
        }
    }
}

impl SourceConfig {
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

    /// Sets the worker count.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Adds an interval trigger.
    #[must_use]
    pub fn with_interval_trigger(mut self, interval: Duration) -> Self {
        self.triggers.push(TriggerSpec::Interval(interval));
        self
    }

    /// Adds a `LISTEN/NOTIFY` trigger.
    ///
    /// The channel for a default installation is
    /// [`crate::notify_channel`]`(schema)`.
    #[must_use]
    pub fn with_notify_trigger(
        mut self,
        url: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        self.triggers.push(TriggerSpec::Notify { url: url.into(), channel: channel.into() });
        self
    }

    /// Skips the migration run on connect.
    #[must_use]
    pub fn skip_migrations(mut self) -> Self {
        self.skip_migrations = true;
        self
    }
}

/// Counters for a running source, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Rows claimed from the store.
    pub claimed: u64,
    /// Rows that reached `processed`.
    pub processed: u64,
    /// Rows that reached `dropped`.
    pub dropped: u64,
    /// Rows rescheduled for a later attempt.
    pub rescheduled: u64,
}

#[derive(Default)]
struct StatsCells {
    claimed: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    rescheduled: AtomicU64,
}

impl StatsCells {
    fn snapshot(&self) -> SourceStats {
        SourceStats {
            claimed: self.claimed.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rescheduled: self.rescheduled.load(Ordering::Relaxed),
        }
    }
}

/// Pulls persisted messages and dispatches them to a [`Receiver`].
pub struct PostgresSource {
    pool: PgPool,
    config: SourceConfig,
    queries: SourceQueries,
    clock: Arc<dyn Clock>,
    started: AtomicBool,
    stats: Arc<StatsCells>,
}

impl PostgresSource {
    /// Connects the source, running migrations unless skipped.
    ///
    /// # Errors
    ///
    /// Returns the driver error when migrations fail.
    pub async fn connect(pool: PgPool, config: SourceConfig) -> Result<Self> {
        if !config.skip_migrations {
            migrate(&pool, &config.schema).await?;
        }
        let queries = SourceQueries::build(&config);
        Ok(Self {
            pool,
            config,
            queries,
            clock: Arc::new(SystemClock),
            started: AtomicBool::new(false),
            stats: Arc::new(StatsCells::default()),
        })
    }

    /// A snapshot of the source's delivery counters.
    pub fn stats(&self) -> SourceStats {
        self.stats.snapshot()
    }

    /// Overrides the clock used for claim windows and retry defaults.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Upserts a `(topic, queue)` subscription into the routing table.
    ///
    /// Consumers declare their queues at startup; the destination's
    /// persisted routing provider reads them back when publishing.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the upsert fails.
    pub async fn queue_declare(&self, topic: &str, queue: &str) -> Result<()> {
        sqlx::query(&self.queries.declare_queue)
            .bind(topic)
            .bind(queue)
            .execute(&self.pool)
            .await?;
        info!(topic, queue, "queue declared");
        Ok(())
    }

    /// Starts the trigger and worker tasks.
    ///
    /// Runs until `cancel` fires. The receiver's registry must be complete:
    /// it is only read from here on.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::AlreadyStarted`] on a second call, or the driver
    /// error when a trigger cannot connect.
    pub async fn start(&self, cancel: CancellationToken, receiver: Arc<Receiver>) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(PgError::AlreadyStarted);
        }

        let triggers: Vec<Arc<dyn Trigger>> = if self.config.triggers.is_empty() {
            vec![Arc::new(IntervalTrigger::new(DEFAULT_TRIGGER_INTERVAL))]
        } else {
            self.config
                .triggers
                .iter()
                .map(|spec| match spec {
                    TriggerSpec::Interval(interval) => {
                        Arc::new(IntervalTrigger::new(*interval)) as Arc<dyn Trigger>
                    },
                    TriggerSpec::Notify { url, channel } => {
                        Arc::new(NotifyTrigger::new(url.clone(), channel.clone()))
                    },
                })
                .collect()
        };

        let mut ticks = AggregateTrigger::new(triggers).start(cancel.clone()).await?;

        // Fan the single trigger stream out to one channel per worker; every
        // tick reaches every worker, and closing the stream closes them all.
        let mut worker_senders = Vec::with_capacity(self.config.max_workers);
        let mut worker_receivers = Vec::with_capacity(self.config.max_workers);
        for _ in 0..self.config.max_workers {
            let (sender, receiver) = mpsc::channel(1);
            worker_senders.push(sender);
            worker_receivers.push(receiver);
        }
        tokio::spawn(async move {
            while ticks.recv().await.is_some() {
                for sender in &worker_senders {
                    if sender.send(()).await.is_err() {
                        return;
                    }
                }
            }
        });

        let inner = Arc::new(SourceInner {
            pool: self.pool.clone(),
            queries: self.queries.clone(),
            receiver,
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
        });
        for worker_id in 0..self.config.max_workers {
            let receiver = worker_receivers.remove(0);
            tokio::spawn(worker_loop(worker_id, receiver, cancel.clone(), Arc::clone(&inner)));
        }

        info!(
            workers = self.config.max_workers,
            schema = %self.config.schema,
            "postgres source started"
        );
        Ok(())
    }
}

/// Shared state of the worker pool.
struct SourceInner {
    pool: PgPool,
    queries: SourceQueries,
    receiver: Arc<Receiver>,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsCells>,
}

async fn worker_loop(
    worker_id: usize,
    mut ticks: mpsc::Receiver<()>,
    cancel: CancellationToken,
    inner: Arc<SourceInner>,
) {
    let processing = Arc::new(AtomicBool::new(false));
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            tick = ticks.recv() => {
                if tick.is_none() {
                    break;
                }
                // At most one pass per worker; ticks during a pass are
                // coalesced into nothing and the next tick re-arms.
                if processing
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                let inner = Arc::clone(&inner);
                let processing = Arc::clone(&processing);
                tokio::spawn(async move {
                    if let Err(error) = inner.run_pass().await {
                        // The claim transaction rolled back; the rows will
                        // be picked up again on a later tick.
                        warn!(worker = worker_id, error = %error, "batch pass aborted");
                    }
                    processing.store(false, Ordering::Release);
                });
            }
        }
    }
    debug!(worker = worker_id, "source worker stopped");
}

impl SourceInner {
    /// One batch pass: claim and dispatch rows until every queue runs dry
    /// or the pass limit is reached.
    async fn run_pass(&self) -> Result<()> {
        let mut visited: Vec<i64> = Vec::new();
        let mut non_empty_queues = self.receiver.queues_with_handlers();
        let mut claimed_count = 0;

        while claimed_count < PASS_CLAIM_LIMIT && !non_empty_queues.is_empty() {
            let index = rand::rng().random_range(0..non_empty_queues.len());
            let queue = non_empty_queues[index].clone();
            let names = self.receiver.messages_with_handlers(&queue);

            let mut tx = self.pool.begin().await?;
            let claimed = self.claim_and_dispatch(&mut tx, &queue, &names, &visited).await?;
            tx.commit().await?;

            match claimed {
                Some(id) => {
                    visited.push(id);
                    claimed_count += 1;
                },
                None => non_empty_queues.retain(|candidate| candidate != &queue),
            }
        }
        if claimed_count > 0 {
            debug!(claimed = claimed_count, "batch pass finished");
        }
        Ok(())
    }

    /// Claims one eligible row, dispatches it, and records the outcome.
    ///
    /// Runs entirely inside the given transaction; any error leaves the row
    /// untouched once the transaction rolls back. Returns the claimed row id
    /// or `None` when the queue has no eligible rows.
    async fn claim_and_dispatch(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        queue: &str,
        names: &[String],
        visited: &[i64],
    ) -> Result<Option<i64>> {
        let now = self.clock.now();
        let row = sqlx::query(&self.queries.select_next)
            .bind(vec![queue.to_string()])
            .bind(names.to_vec())
            .bind(visited.to_vec())
            .bind(now)
            .fetch_optional(&mut **tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get(0)?;
        let uuid: String = row.try_get(1)?;
        let row_queue: String = row.try_get(2)?;
        let payload: Vec<u8> = row.try_get(3)?;
        let attempts: i32 = row.try_get(4)?;

        let message = Message::decode(&payload)?;
        let attempt = u32::try_from(attempts).unwrap_or(0) + 1;
        let delivery = Delivery { queue: row_queue.clone(), attempt, message };
        let outcome = self.receiver.deliver(&Context::new(), delivery).await?;

        // The attempt is recorded regardless of the outcome, in the same
        // transaction that records the outcome itself.
        let incremented = sqlx::query(&self.queries.increment_attempts)
            .bind(&row_queue)
            .bind(&uuid)
            .execute(&mut **tx)
            .await?;
        if incremented.rows_affected() != 1 {
            return Err(PgError::InternalInconsistency(format!(
                "incrementing delivery attempts touched {} rows, expected 1",
                incremented.rows_affected()
            )));
        }

        self.stats.claimed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(()) => {
                self.set_status(tx, &row_queue, &uuid, "processed").await?;
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                debug!(queue = %row_queue, uuid = %uuid, attempt, "message processed");
            },
            Err(error) if error.is_fatal() => {
                self.set_status(tx, &row_queue, &uuid, "dropped").await?;
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(queue = %row_queue, uuid = %uuid, attempt, error = %error, "message dropped");
            },
            Err(error) => {
                let retry_at = error
                    .retry_time()
                    .unwrap_or_else(|| now + chrono::Duration::seconds(DEFAULT_RETRY_DELAY_SECS));
                self.set_deliver_at(tx, &row_queue, &uuid, retry_at).await?;
                self.stats.rescheduled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    queue = %row_queue,
                    uuid = %uuid,
                    attempt,
                    retry_at = %retry_at,
                    error = %error,
                    "message scheduled for retry"
                );
            },
        }
        Ok(Some(id))
    }

    async fn set_status(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        queue: &str,
        uuid: &str,
        status: &str,
    ) -> Result<()> {
        let updated = sqlx::query(&self.queries.set_status)
            .bind(status)
            .bind(queue)
            .bind(uuid)
            .execute(&mut **tx)
            .await?;
        if updated.rows_affected() != 1 {
            return Err(PgError::InternalInconsistency(format!(
                "setting status to {status:?} touched {} rows, expected 1",
                updated.rows_affected()
            )));
        }
        Ok(())
    }

    async fn set_deliver_at(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        queue: &str,
        uuid: &str,
        deliver_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(&self.queries.set_deliver_at)
            .bind(deliver_at)
            .bind(queue)
            .bind(uuid)
            .execute(&mut **tx)
            .await?;
        if updated.rows_affected() != 1 {
            return Err(PgError::InternalInconsistency(format!(
                "rescheduling delivery touched {} rows, expected 1",
                updated.rows_affected()
            )));
        }
        Ok(())
    }
}

/// Prebuilt SQL for the configured schema and table naming.
#[derive(Debug, Clone)]
struct SourceQueries {
    select_next: String,
    increment_attempts: String,
    set_status: String,
    set_deliver_at: String,
    declare_queue: String,
}

impl SourceQueries {
    fn build(config: &SourceConfig) -> Self {
        let table = config.events.qualified(&config.schema);
        let c = &config.events.columns;
        Self {
            select_next: format!(
                "SELECT {id}, {uuid}, {queue}, {payload}, {attempts} FROM {table} \
                 WHERE {status} = 'pending' AND {queue} = ANY($1) AND {name} = ANY($2) \
                 AND NOT ({id} = ANY($3)) AND {deliver_at} <= $4 \
                 ORDER BY {published_at} ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
                id = c.id,
                uuid = c.uuid,
                queue = c.queue,
                payload = c.payload,
                attempts = c.delivery_attempts,
                status = c.status,
                name = c.name,
                deliver_at = c.deliver_at,
                published_at = c.published_at,
            ),
            increment_attempts: format!(
                "UPDATE {table} SET {attempts} = {attempts} + 1 \
                 WHERE {queue} = $1 AND {uuid} = $2",
                attempts = c.delivery_attempts,
                queue = c.queue,
                uuid = c.uuid,
            ),
            set_status: format!(
                "UPDATE {table} SET {status} = $1 WHERE {queue} = $2 AND {uuid} = $3",
                status = c.status,
                queue = c.queue,
                uuid = c.uuid,
            ),
            set_deliver_at: format!(
                "UPDATE {table} SET {deliver_at} = $1 WHERE {queue} = $2 AND {uuid} = $3",
                deliver_at = c.deliver_at,
                queue = c.queue,
                uuid = c.uuid,
            ),
            declare_queue: format!(
                "INSERT INTO {schema}.routing (topic, queue) VALUES ($1, $2) \
                 ON CONFLICT (topic, queue) DO UPDATE SET last_declared_at = now()",
                schema = config.schema,
            ),
        }
    }
}
