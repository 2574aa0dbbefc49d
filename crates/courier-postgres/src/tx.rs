//! Publishing inside a caller-owned database transaction.
//!
//! The destination normally opens and commits its own transaction per
//! batch. A caller that wants the outbox insert to commit or roll back with
//! its business writes wraps its transaction in a [`SharedTransaction`] and
//! threads it through the publish [`Context`] with [`with_tx`]; the
//! destination then executes inside it and leaves the lifecycle alone.

use std::sync::Arc;

use courier_core::Context;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{PgError, Result};

/// A caller-owned transaction, shareable with the destination.
///
/// The caller keeps a clone and finishes the transaction with
/// [`SharedTransaction::commit`] or [`SharedTransaction::rollback`]; the
/// destination only executes statements inside it. Using the transaction
/// after it finished yields [`PgError::TransactionCompleted`].
#[derive(Clone)]
pub struct SharedTransaction {
    inner: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

impl SharedTransaction {
    /// Wraps an already-begun transaction.
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { inner: Arc::new(Mutex::new(Some(tx))) }
    }

    /// Begins a new transaction on the pool.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the transaction cannot be started.
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        Ok(Self::new(pool.begin().await?))
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::TransactionCompleted`] when already finished, or
    /// the driver error from the commit itself.
    pub async fn commit(&self) -> Result<()> {
        let tx = self.inner.lock().await.take().ok_or(PgError::TransactionCompleted)?;
        tx.commit().await.map_err(PgError::from)
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::TransactionCompleted`] when already finished, or
    /// the driver error from the rollback itself.
    pub async fn rollback(&self) -> Result<()> {
        let tx = self.inner.lock().await.take().ok_or(PgError::TransactionCompleted)?;
        tx.rollback().await.map_err(PgError::from)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<Transaction<'static, Postgres>>> {
        self.inner.lock().await
    }
}

impl std::fmt::Debug for SharedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransaction").finish_non_exhaustive()
    }
}

/// Typed context key carrying the ambient transaction.
#[derive(Clone)]
struct AmbientTx(SharedTransaction);

/// Returns a context that carries the caller's transaction.
///
/// Destinations seeing this context execute inside the transaction and do
/// not commit or roll it back.
#[must_use]
pub fn with_tx(cx: &Context, tx: SharedTransaction) -> Context {
    cx.with_value(AmbientTx(tx))
}

/// The ambient transaction, if the context carries one.
pub(crate) fn ambient_tx(cx: &Context) -> Option<SharedTransaction> {
    cx.get::<AmbientTx>().map(|ambient| ambient.0.clone())
}
