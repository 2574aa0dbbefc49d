//! Topic → queue routing for the outbox insert.
//!
//! The destination writes one event row per `(message, queue)` pair; the
//! routing provider decides which queues a topic fans out to. The static
//! provider is configured in code and falls back to the `default` queue;
//! the declared provider reads the subscriptions consumers have upserted
//! into the routing table, inside the same transaction as the insert.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgConnection;

use crate::error::Result;

/// Resolves the queues a topic is delivered to.
#[async_trait]
pub trait Routing: Send + Sync {
    /// Returns the queues subscribed to `topic`.
    ///
    /// Runs inside the insert's transaction; providers that hit the
    /// database see the same snapshot as the insert itself.
    ///
    /// # Errors
    ///
    /// Returns the driver error for database-backed providers.
    async fn queues_for(&self, conn: &mut PgConnection, topic: &str) -> Result<Vec<String>>;
}

/// In-memory routing table with append semantics.
///
/// Registering the same topic twice extends its queue list; duplicates are
/// kept, and traversal order is registration order. Topics with no entry
/// route to the `default` queue.
#[derive(Debug, Clone, Default)]
pub struct StaticRouting {
    topic_to_queues: HashMap<String, Vec<String>>,
}

impl StaticRouting {
    /// Creates an empty routing table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends queues to a topic's routing list.
    pub fn add<I, Q>(&mut self, topic: impl Into<String>, queues: I)
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.topic_to_queues
            .entry(topic.into())
            .or_default()
            .extend(queues.into_iter().map(Into::into));
    }

    /// Whether any topic has been registered.
    pub fn is_empty(&self) -> bool {
        self.topic_to_queues.is_empty()
    }
}

#[async_trait]
impl Routing for StaticRouting {
    async fn queues_for(&self, _conn: &mut PgConnection, topic: &str) -> Result<Vec<String>> {
        Ok(self
            .topic_to_queues
            .get(topic)
            .cloned()
            .unwrap_or_else(|| vec!["default".to_string()]))
    }
}

/// Routing backed by the persisted routing table.
///
/// Returns exactly the declared subscribers; a topic nobody declared routes
/// nowhere and the message is not persisted for any queue.
#[derive(Debug, Clone)]
pub struct DeclaredRouting {
    query: String,
}

impl DeclaredRouting {
    /// Creates a provider reading `{schema}.routing`.
    pub fn new(schema: impl AsRef<str>) -> Self {
        let schema = schema.as_ref();
        Self { query: format!("SELECT queue FROM {schema}.routing WHERE topic = $1 ORDER BY queue") }
    }
}

#[async_trait]
impl Routing for DeclaredRouting {
    async fn queues_for(&self, conn: &mut PgConnection, topic: &str) -> Result<Vec<String>> {
        let queues = sqlx::query_scalar(&self.query).bind(topic).fetch_all(conn).await?;
        Ok(queues)
    }
}
