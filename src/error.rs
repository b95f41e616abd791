//! Error taxonomy of the indexer core.
//!
//! Every failure a chain scanner can observe falls into one of four variants.
//! The scan loop matches on them explicitly: transient and storage failures
//! abandon the current iteration, malformed logs abandon the whole range, and
//! configuration errors never reach a running scanner (they abort startup).

use thiserror::Error;

/// Boxed error source kept by the wrapping variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors emitted by the indexer core.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Network or timeout failure of an RPC call.
    #[error("{operation} failed: {source}")]
    Transient {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// A log returned by the endpoint could not be decoded into a fee event.
    ///
    /// Scoped to the range that contained it; never retried by the retry policy.
    #[error("malformed log (block {block_number:?}, tx {transaction_hash:?}): {reason}")]
    MalformedLog {
        block_number: Option<u64>,
        transaction_hash: Option<String>,
        reason: String,
    },

    /// The checkpoint store or the event store rejected a read or a write.
    #[error("storage failure: {0}")]
    Storage(#[source] BoxError),

    /// Invalid configuration, fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IndexerError {
    pub fn transient(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Transient {
            operation,
            source: source.into(),
        }
    }

    pub fn storage(source: impl Into<BoxError>) -> Self {
        Self::Storage(source.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::MalformedLog { .. } => "malformed_log",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
        }
    }
}

pub type IndexerResult<T> = Result<T, IndexerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_wraps_anyhow_errors() {
        let err = IndexerError::storage(anyhow::anyhow!("disk full"));
        assert_eq!(err.kind(), "storage");
        assert_eq!(err.to_string(), "storage failure: disk full");
    }

    #[test]
    fn transient_names_the_operation() {
        let err = IndexerError::transient("eth_blockNumber", "connection reset");
        assert_eq!(err.to_string(), "eth_blockNumber failed: connection reset");
        assert!(std::error::Error::source(&err).is_some());
    }
}
