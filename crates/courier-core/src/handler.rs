//! Handler outcome taxonomy.
//!
//! A handler either succeeds, asks for a retry (optionally naming the
//! instant), or declares the message unprocessable. Classification is by
//! variant, not by inspecting the wrapped error; anything converted from a
//! plain error defaults to retryable.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Outcome of a single handler invocation.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A handler's decision about a failed delivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Drop the message; further attempts cannot succeed.
    #[error("fatal handler error: {source}")]
    Fatal {
        /// The underlying cause.
        source: anyhow::Error,
    },

    /// Retry the delivery later.
    #[error("retryable handler error: {source}")]
    Retry {
        /// The underlying cause.
        source: anyhow::Error,
        /// When to retry; `None` defers to the scheduling policy.
        retry_at: Option<DateTime<Utc>>,
    },
}

impl HandlerError {
    /// Marks an error as fatal: the message is dropped, never retried.
    pub fn fatal(source: impl Into<anyhow::Error>) -> Self {
        Self::Fatal { source: source.into() }
    }

    /// Marks an error as retryable under the default policy.
    pub fn retry(source: impl Into<anyhow::Error>) -> Self {
        Self::Retry { source: source.into(), retry_at: None }
    }

    /// Marks an error as retryable no earlier than the given instant.
    pub fn retry_at(source: impl Into<anyhow::Error>, at: DateTime<Utc>) -> Self {
        Self::Retry { source: source.into(), retry_at: Some(at) }
    }

    /// Whether the message must be dropped instead of retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// The requested retry instant, if the handler named one.
    pub fn retry_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Retry { retry_at, .. } => *retry_at,
            Self::Fatal { .. } => None,
        }
    }

    /// Unwraps the underlying cause.
    pub fn into_source(self) -> anyhow::Error {
        match self {
            Self::Fatal { source } | Self::Retry { source, .. } => source,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(source: anyhow::Error) -> Self {
        Self::Retry { source, retry_at: None }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn plain_errors_default_to_retryable() {
        let error: HandlerError = anyhow!("downstream hiccup").into();
        assert!(!error.is_fatal());
        assert_eq!(error.retry_time(), None);
    }

    #[test]
    fn fatal_is_classified_by_variant() {
        assert!(HandlerError::fatal(anyhow!("bad payload")).is_fatal());
        assert!(!HandlerError::retry(anyhow!("try again")).is_fatal());
    }

    #[test]
    fn retry_at_carries_the_instant() {
        let at = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();
        let error = HandlerError::retry_at(anyhow!("busy"), at);
        assert_eq!(error.retry_time(), Some(at));
    }

    #[test]
    fn into_source_preserves_the_cause() {
        let error = HandlerError::fatal(anyhow!("bad payload"));
        assert_eq!(error.into_source().to_string(), "bad payload");
    }
}
