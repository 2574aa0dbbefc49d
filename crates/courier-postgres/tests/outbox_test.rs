//! Integration tests for the outbox destination, routing, and migrator.
//!
//! These run against `COURIER_TEST_DATABASE_URL` and skip cleanly when it
//! is unset. Every test works inside its own schema.

use std::sync::Arc;

use anyhow::Result;
use courier_core::{Context, Message, Publisher};
use courier_postgres::{
    migrate, with_tx, DestinationConfig, PostgresDestination, PostgresSource, SharedTransaction,
    SourceConfig,
};
use courier_testing::{Invariants, TestDatabase};

fn message(name: &str) -> Message {
    Message::new(name, br"{}".to_vec()).unwrap()
}

#[tokio::test]
async fn republication_is_idempotent_per_queue() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };

    let destination = PostgresDestination::connect(
        db.pool(),
        DestinationConfig::new()
            .with_schema(db.schema())
            .with_topic_to_queues("customers", ["q1", "q2"]),
    )
    .await?;
    let publisher = Publisher::builder().sync_bridge(vec![Arc::new(destination)]).build()?;

    let original = message("customers.created");
    publisher.publish(&Context::new(), original.clone()).await?;
    publisher.publish(&Context::new(), original.clone()).await?;

    let rows = db.event_rows().await?;
    assert_eq!(rows.len(), 2, "one row per queue, duplicates swallowed");
    let mut queues: Vec<&str> = rows.iter().map(|row| row.queue.as_str()).collect();
    queues.sort_unstable();
    assert_eq!(queues, vec!["q1", "q2"]);
    for row in &rows {
        assert_eq!(row.uuid, original.uuid().to_string());
        assert_eq!(row.status, "pending");
        assert_eq!(row.delivery_attempts, 0);
    }
    Invariants::check_all(&rows)?;

    db.drop_schema().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_topics_fall_back_to_the_default_queue() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };

    let destination = PostgresDestination::connect(
        db.pool(),
        DestinationConfig::new()
            .with_schema(db.schema())
            .with_topic_to_queues("customers", ["q1"]),
    )
    .await?;
    let publisher = Publisher::builder().sync_bridge(vec![Arc::new(destination)]).build()?;

    publisher.publish(&Context::new(), message("orders.created")).await?;

    let rows = db.event_rows().await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].queue, "default");

    db.drop_schema().await?;
    Ok(())
}

#[tokio::test]
async fn declared_routing_delivers_to_exactly_the_subscribers() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };

    // Declared (persisted) routing is the default when no static routes are
    // configured.
    let destination = PostgresDestination::connect(
        db.pool(),
        DestinationConfig::new().with_schema(db.schema()),
    )
    .await?;
    let source = PostgresSource::connect(
        db.pool(),
        SourceConfig::new().with_schema(db.schema()).skip_migrations(),
    )
    .await?;
    source.queue_declare("customers", "qa").await?;
    source.queue_declare("customers", "qb").await?;
    // Re-declaring is an upsert, not a duplicate subscription.
    source.queue_declare("customers", "qa").await?;

    let publisher = Publisher::builder().sync_bridge(vec![Arc::new(destination)]).build()?;
    publisher.publish(&Context::new(), message("customers.created")).await?;
    // Nobody declared the orders topic; the message routes nowhere.
    publisher.publish(&Context::new(), message("orders.created")).await?;

    let rows = db.event_rows().await?;
    let mut queues: Vec<&str> = rows.iter().map(|row| row.queue.as_str()).collect();
    queues.sort_unstable();
    assert_eq!(queues, vec!["qa", "qb"]);

    db.drop_schema().await?;
    Ok(())
}

#[tokio::test]
async fn ambient_transaction_owns_the_outcome() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };

    let destination = PostgresDestination::connect(
        db.pool(),
        DestinationConfig::new()
            .with_schema(db.schema())
            .with_topic_to_queues("customers", ["q1"]),
    )
    .await?;
    let publisher = Publisher::builder().sync_bridge(vec![Arc::new(destination)]).build()?;

    // Rolled back: the insert disappears with the caller's transaction.
    let tx = SharedTransaction::begin(&db.pool()).await?;
    publisher.publish(&with_tx(&Context::new(), tx.clone()), message("customers.created")).await?;
    tx.rollback().await?;
    assert!(db.event_rows().await?.is_empty());

    // Committed: the insert lands together with the caller's transaction.
    let tx = SharedTransaction::begin(&db.pool()).await?;
    publisher.publish(&with_tx(&Context::new(), tx.clone()), message("customers.created")).await?;
    assert!(db.event_rows().await?.is_empty(), "not visible before the caller commits");
    tx.commit().await?;
    assert_eq!(db.event_rows().await?.len(), 1);

    db.drop_schema().await?;
    Ok(())
}

#[tokio::test]
async fn finished_transactions_are_rejected() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };
    migrate(&db.pool(), db.schema()).await?;

    let tx = SharedTransaction::begin(&db.pool()).await?;
    tx.commit().await?;
    assert!(tx.commit().await.is_err());
    assert!(tx.rollback().await.is_err());

    db.drop_schema().await?;
    Ok(())
}

#[tokio::test]
async fn migrations_are_idempotent_across_runs() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };

    migrate(&db.pool(), db.schema()).await?;
    migrate(&db.pool(), db.schema()).await?;

    let applied: Vec<i32> = sqlx::query_scalar(&format!(
        "SELECT id FROM {}.migrations ORDER BY id",
        db.schema()
    ))
    .fetch_all(&db.pool())
    .await?;
    assert_eq!(applied, vec![1, 2, 3]);

    db.drop_schema().await?;
    Ok(())
}

#[tokio::test]
async fn large_batches_are_chunked_into_multiple_inserts() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };

    let destination = PostgresDestination::connect(
        db.pool(),
        DestinationConfig::new()
            .with_schema(db.schema())
            .with_topic_to_queues("customers", ["q1"]),
    )
    .await?;
    let publisher = Publisher::builder().sync_bridge(vec![Arc::new(destination)]).build()?;

    // 130 messages on one queue crosses the 128-row chunk boundary.
    let batch: Vec<Message> = (0..130).map(|_| message("customers.created")).collect();
    publisher.publish_many(&Context::new(), batch).await?;

    assert_eq!(db.event_rows().await?.len(), 130);

    db.drop_schema().await?;
    Ok(())
}
