//! Error types shared by the transaction manager, the graph layer and
//! document store implementations.

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::Unid;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by a document store implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The document is locked by another holder.
    #[error("document {unid} is locked by {holder}")]
    Locked {
        /// Locked document.
        unid: Unid,
        /// Current lock holder.
        holder: String,
    },
    /// No document exists under the given key.
    #[error("document {0} not found")]
    NotFound(Unid),
    /// The document has been deleted.
    #[error("document {0} is deleted")]
    Deleted(Unid),
    /// Any other backend failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Errors surfaced by the graph and transaction APIs.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A store call failed; `context` names the operation, key and field involved.
    #[error("store error ({context}): {source}")]
    Store {
        /// Operation, key and field the failure relates to.
        context: String,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// Caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation is deliberately not supported by the graph.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// Reserved bookkeeping fields cannot be written through the public API.
    #[error("property {0} is reserved")]
    ReservedProperty(String),
    /// Two distinct external keys hashed to the same document key.
    #[error("key {key:?} collides with the document stored under {unid}")]
    KeyCollision {
        /// Key that was requested.
        key: String,
        /// Derived document key already owned by another key.
        unid: Unid,
    },
    /// The transaction has already been committed or rolled back.
    #[error("transaction already closed")]
    TransactionClosed,
    /// The owning graph was dropped while an element was still in use.
    #[error("graph has been closed")]
    GraphClosed,
    /// Internal state is inconsistent.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GraphError {
    /// Wraps a store failure with the operation context it happened in.
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        GraphError::Store {
            context: context.into(),
            source,
        }
    }
}

/// Extension for attaching context to raw store results.
pub(crate) trait StoreResultExt<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> StoreResultExt<T> for std::result::Result<T, StoreError> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| GraphError::store(context(), source))
    }
}
