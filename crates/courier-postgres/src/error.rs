//! Error types for the PostgreSQL adapters.

use thiserror::Error;

/// Result type alias using [`PgError`].
pub type Result<T> = std::result::Result<T, PgError>;

/// Errors from the PostgreSQL destination, source, and migrator.
#[derive(Debug, Error)]
pub enum PgError {
    /// Underlying driver error, propagated verbatim.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A statement affected an unexpected number of rows.
    ///
    /// The per-row update statements target exactly one row by
    /// `(queue, uuid)`; anything else means the table is in a state the
    /// scheduler does not understand.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// `start` was called on a source that is already running.
    #[error("source already started")]
    AlreadyStarted,

    /// A caller-owned transaction was used after commit or rollback.
    #[error("transaction already completed")]
    TransactionCompleted,

    /// An error from the core messaging types.
    #[error(transparent)]
    Core(#[from] courier_core::Error),
}

impl PgError {
    /// Whether the error is the driver's "undefined table" (SQL state
    /// `42P01`), which the migrator treats as "schema not installed yet".
    pub(crate) fn is_undefined_table(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("42P01")
            },
            _ => false,
        }
    }
}
