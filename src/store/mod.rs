//! Document store facade.
//!
//! The graph and the transaction manager only ever talk to persistence
//! through these traits: create or fetch a document, read and write named
//! items, save, delete permanently, lock and unlock, and scan a view
//! selecting documents by an item value.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::StoreError;
use crate::types::{Unid, Value};

pub mod memory;

pub use memory::{MemoryStore, StoreEvent};

/// Shared handle to a document.
pub type DocumentRef = Arc<dyn Document>;

/// Result type returned by store implementations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Identity of one database, shared by every handle onto it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    /// Allocates an identity no other store in this process holds.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StoreId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// One document: a working copy of named items over a persisted record.
pub trait Document: Send + Sync {
    /// Universal identifier.
    fn unid(&self) -> Unid;

    /// Database the document belongs to.
    fn store_id(&self) -> StoreId;

    /// Reads an item from the working copy.
    fn item(&self, name: &str) -> StoreResult<Option<Value>>;

    /// Replaces an item in the working copy.
    fn replace_item(&self, name: &str, value: Value) -> StoreResult<()>;

    /// Removes an item from the working copy, returning the old value.
    fn remove_item(&self, name: &str) -> StoreResult<Option<Value>>;

    /// Names of all items in the working copy.
    fn item_names(&self) -> StoreResult<Vec<String>>;

    /// Persists the working copy. `Ok(false)` reports a failed save that
    /// did not raise.
    fn save(&self) -> StoreResult<bool>;

    /// Deletes the document permanently.
    fn remove_permanently(&self, force: bool) -> StoreResult<()>;

    /// Acquires the advisory lock. `Ok(false)` if it could not be taken.
    fn lock(&self) -> StoreResult<bool>;

    /// Releases the advisory lock if this handle's owner holds it.
    fn unlock(&self) -> StoreResult<()>;

    /// True if the document has been deleted from the store.
    fn is_deleted(&self) -> bool;

    /// Discards working-copy changes, returning to the persisted state.
    fn revert(&self) -> StoreResult<()>;
}

/// A stored selection over documents.
pub trait View: Send + Sync {
    /// View name.
    fn name(&self) -> &str;

    /// UNIDs of every persisted document the selection matches.
    fn all_entries(&self) -> StoreResult<Vec<Unid>>;
}

/// Selection predicate of a view.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    /// Every document.
    All,
    /// Documents whose item `field` equals `value`.
    FieldEquals {
        /// Item name.
        field: String,
        /// Required value.
        value: Value,
    },
}

impl Selection {
    /// Selection on a single item value.
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Selection::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Evaluates the predicate against a document's items.
    pub fn matches<'a>(&self, item: impl Fn(&str) -> Option<&'a Value>) -> bool {
        match self {
            Selection::All => true,
            Selection::FieldEquals { field, value } => item(field) == Some(value),
        }
    }
}

/// Entry point of a document database.
pub trait DocumentStore: Send + Sync {
    /// Identity of the database behind this handle.
    fn store_id(&self) -> StoreId;

    /// Creates an unsaved document, under `unid` if given or a fresh key.
    fn create_document(&self, unid: Option<Unid>) -> StoreResult<DocumentRef>;

    /// Fetches a document by key. Deleted documents are returned with
    /// [`Document::is_deleted`] set; unknown keys yield `None`.
    fn document_by_unid(&self, unid: &Unid) -> StoreResult<Option<DocumentRef>>;

    /// Opens the named view, creating it with `selection` if missing.
    fn create_or_open_view(&self, name: &str, selection: &Selection) -> StoreResult<Arc<dyn View>>;

    /// Whether the database asks for document locking.
    fn document_locking_enabled(&self) -> bool;
}
