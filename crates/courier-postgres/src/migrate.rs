//! Embedded, idempotent schema migrations.
//!
//! Scripts are numbered `NNNNNN_*.sql` and applied in ascending order, one
//! transaction per script, recording each id in `{schema}.migrations`. The
//! literal `:SCHEMA` in script text is replaced with the configured schema
//! before execution. A missing migrations table (SQL state `42P01`) means a
//! fresh database: the schema and the table are created first.

use sqlx::PgPool;
use tracing::info;

use crate::{
    config::with_schema,
    error::{PgError, Result},
};

struct EmbeddedMigration {
    id: i32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[EmbeddedMigration] = &[
    EmbeddedMigration {
        id: 1,
        name: "000001_create_events_table",
        sql: include_str!("../migrations/000001_create_events_table.sql"),
    },
    EmbeddedMigration {
        id: 2,
        name: "000002_create_events_notify_trigger",
        sql: include_str!("../migrations/000002_create_events_notify_trigger.sql"),
    },
    EmbeddedMigration {
        id: 3,
        name: "000003_create_routing_table",
        sql: include_str!("../migrations/000003_create_routing_table.sql"),
    },
];

/// Brings the schema up to date.
///
/// Safe to call from several processes: each script runs in its own
/// transaction and re-running an applied script is skipped by id.
///
/// # Errors
///
/// Returns the driver error of the first failing script.
pub async fn migrate(pool: &PgPool, schema: &str) -> Result<()> {
    let applied_through = match latest_applied(pool, schema).await {
        Ok(id) => id,
        Err(error) if error.is_undefined_table() => {
            install_schema(pool, schema).await?;
            0
        },
        Err(error) => return Err(error),
    };

    for migration in MIGRATIONS.iter().filter(|m| m.id > applied_through) {
        apply(pool, schema, migration).await?;
        info!(schema, migration = migration.name, "migration applied");
    }
    Ok(())
}

async fn latest_applied(pool: &PgPool, schema: &str) -> Result<i32> {
    let id: Option<i32> =
        sqlx::query_scalar(&format!("SELECT id FROM {schema}.migrations ORDER BY id DESC LIMIT 1"))
            .fetch_optional(pool)
            .await?;
    Ok(id.unwrap_or(0))
}

async fn install_schema(pool: &PgPool, schema: &str) -> Result<()> {
    let sql = format!(
        "CREATE SCHEMA {schema}; \
         CREATE TABLE {schema}.migrations (\
             id int PRIMARY KEY, \
             ts timestamptz NOT NULL DEFAULT now()\
         )"
    );
    sqlx::raw_sql(&sql).execute(pool).await?;
    info!(schema, "schema installed");
    Ok(())
}

async fn apply(pool: &PgPool, schema: &str, migration: &EmbeddedMigration) -> Result<()> {
    let mut tx = pool.begin().await?;
    let sql = with_schema(migration.sql, schema);
    sqlx::raw_sql(&sql).execute(&mut *tx).await?;
    sqlx::query(&format!("INSERT INTO {schema}.migrations (id) VALUES ($1)"))
        .bind(migration.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_numbered_and_ascending() {
        let mut previous = 0;
        for migration in MIGRATIONS {
            assert!(migration.id > previous, "{} out of order", migration.name);
            assert!(migration.name.starts_with(&format!("{:06}_", migration.id)));
            previous = migration.id;
        }
    }

    #[test]
    fn scripts_reference_only_the_placeholder_schema() {
        for migration in MIGRATIONS {
            assert!(
                migration.sql.contains(":SCHEMA"),
                "{} does not use the schema placeholder",
                migration.name
            );
        }
    }

    #[test]
    fn undefined_table_detection_matches_sql_state() {
        let other = PgError::InternalInconsistency("x".to_string());
        assert!(!other.is_undefined_table());
    }
}
