//! Transactional property graph layered on a document database.
//!
//! Vertices and edges are stored as documents behind the [`DocumentStore`]
//! facade. Mutations are queued on a [`DatabaseTransaction`] and applied
//! when the [`Graph`] commits; vertex adjacency sets are tracked in memory
//! and written back only when they changed.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod graph;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod schema;
pub mod store;
pub mod txn;
pub mod types;

pub use config::{CommitPolicy, ConfigError, GraphConfig, GraphOptions};
pub use error::{GraphError, Result, StoreError};
pub use graph::{Edge, Element, Features, Graph, UnitOfWork, Vertex};
pub use ids::{ElementKey, Key};
pub use metrics::{CounterMetrics, GraphMetrics, NoopMetrics};
pub use store::{
    Document, DocumentRef, DocumentStore, MemoryStore, Selection, StoreEvent, StoreId, View,
};
pub use txn::{CommitReport, DatabaseTransaction, ElementOutcome, OutcomeStatus, QueueOp, TxState};
pub use types::{Direction, ElementKind, Unid, Value};
