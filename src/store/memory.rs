//! In-process document store.
//!
//! Documents are persisted into a shared map on `save`; every handle keeps
//! its own working copy until then. The store records a journal of every
//! persistence-relevant call so callers can observe ordering, and can be
//! told to fail saves or lock attempts for specific documents.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{Document, DocumentRef, DocumentStore, Selection, StoreId, StoreResult, View};
use crate::error::StoreError;
use crate::schema::{FieldValue, Millis, CREATED};
use crate::types::{Unid, Value};

/// A persistence-relevant call observed by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    /// A document handle was created.
    Created(Unid),
    /// A persisted document was fetched by key.
    Fetched(Unid),
    /// A save succeeded.
    Saved(Unid),
    /// A save reported failure.
    SaveFailed(Unid),
    /// A document was deleted permanently.
    Removed(Unid),
    /// A lock was acquired.
    Locked(Unid),
    /// A lock attempt was refused.
    LockRefused(Unid),
    /// A lock was released.
    Unlocked(Unid),
    /// A working copy was reverted.
    Reverted(Unid),
}

impl StoreEvent {
    /// Document the event refers to.
    pub fn unid(&self) -> &Unid {
        match self {
            StoreEvent::Created(u)
            | StoreEvent::Fetched(u)
            | StoreEvent::Saved(u)
            | StoreEvent::SaveFailed(u)
            | StoreEvent::Removed(u)
            | StoreEvent::Locked(u)
            | StoreEvent::LockRefused(u)
            | StoreEvent::Unlocked(u)
            | StoreEvent::Reverted(u) => u,
        }
    }
}

#[derive(Clone, Debug)]
struct PersistedDoc {
    items: BTreeMap<String, Value>,
    seq: u64,
}

#[derive(Default)]
struct StoreState {
    docs: HashMap<Unid, PersistedDoc>,
    tombstones: HashSet<Unid>,
    locks: HashMap<Unid, String>,
    views: HashMap<String, Selection>,
    fail_saves: HashSet<Unid>,
    fail_locks: HashSet<Unid>,
    next_seq: u64,
}

struct Shared {
    id: StoreId,
    state: Mutex<StoreState>,
    journal: Mutex<Vec<StoreEvent>>,
    document_locking: Mutex<bool>,
}

impl Shared {
    fn record(&self, event: StoreEvent) {
        self.journal.lock().push(event);
    }
}

/// Cloneable handle to an in-memory document database.
///
/// Each handle acts for one lock owner; [`MemoryStore::session`] opens a
/// second handle over the same data under another owner name.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    owner: String,
}

impl MemoryStore {
    /// Creates an empty store with document locking disabled.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                id: StoreId::fresh(),
                state: Mutex::new(StoreState::default()),
                journal: Mutex::new(Vec::new()),
                document_locking: Mutex::new(false),
            }),
            owner: "default".to_owned(),
        }
    }

    /// Creates an empty store with document locking enabled.
    pub fn with_document_locking() -> Self {
        let store = Self::new();
        store.set_document_locking(true);
        store
    }

    /// Another handle over the same data acting as lock owner `owner`.
    pub fn session(&self, owner: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            owner: owner.into(),
        }
    }

    /// Lock owner name of this handle.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Toggles the database-level document locking flag.
    pub fn set_document_locking(&self, enabled: bool) {
        *self.shared.document_locking.lock() = enabled;
    }

    /// Makes every subsequent save of `unid` report failure.
    pub fn fail_saves_for(&self, unid: &Unid) {
        self.shared.state.lock().fail_saves.insert(unid.clone());
    }

    /// Makes every subsequent lock attempt on `unid` fail.
    pub fn fail_locks_for(&self, unid: &Unid) {
        self.shared.state.lock().fail_locks.insert(unid.clone());
    }

    /// Clears injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.shared.state.lock();
        state.fail_saves.clear();
        state.fail_locks.clear();
    }

    /// Snapshot of the call journal.
    pub fn journal(&self) -> Vec<StoreEvent> {
        self.shared.journal.lock().clone()
    }

    /// Empties the call journal.
    pub fn clear_journal(&self) {
        self.shared.journal.lock().clear();
    }

    /// Persisted items of `unid`, if it has been saved and not deleted.
    pub fn persisted(&self, unid: &Unid) -> Option<BTreeMap<String, Value>> {
        self.shared
            .state
            .lock()
            .docs
            .get(unid)
            .map(|doc| doc.items.clone())
    }

    /// Number of persisted documents.
    pub fn persisted_count(&self) -> usize {
        self.shared.state.lock().docs.len()
    }

    /// Current lock holder of `unid`.
    pub fn lock_holder(&self, unid: &Unid) -> Option<String> {
        self.shared.state.lock().locks.get(unid).cloned()
    }

    fn handle(&self, unid: Unid, items: BTreeMap<String, Value>, stub: bool) -> DocumentRef {
        Arc::new(MemoryDocument {
            shared: Arc::clone(&self.shared),
            owner: self.owner.clone(),
            unid,
            stub,
            working: Mutex::new(items),
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn store_id(&self) -> StoreId {
        self.shared.id
    }

    fn create_document(&self, unid: Option<Unid>) -> StoreResult<DocumentRef> {
        let unid = unid.unwrap_or_else(Unid::random);
        let mut items = BTreeMap::new();
        items.insert(CREATED.name().to_owned(), Millis::now().into_value());
        self.shared.record(StoreEvent::Created(unid.clone()));
        Ok(self.handle(unid, items, false))
    }

    fn document_by_unid(&self, unid: &Unid) -> StoreResult<Option<DocumentRef>> {
        let found = {
            let state = self.shared.state.lock();
            if state.tombstones.contains(unid) {
                Some((BTreeMap::new(), true))
            } else {
                state.docs.get(unid).map(|doc| (doc.items.clone(), false))
            }
        };
        Ok(found.map(|(items, stub)| {
            self.shared.record(StoreEvent::Fetched(unid.clone()));
            self.handle(unid.clone(), items, stub)
        }))
    }

    fn create_or_open_view(&self, name: &str, selection: &Selection) -> StoreResult<Arc<dyn View>> {
        let selection = {
            let mut state = self.shared.state.lock();
            state
                .views
                .entry(name.to_owned())
                .or_insert_with(|| {
                    debug!(view = name, "memory_store.view.created");
                    selection.clone()
                })
                .clone()
        };
        Ok(Arc::new(MemoryView {
            shared: Arc::clone(&self.shared),
            name: name.to_owned(),
            selection,
        }))
    }

    fn document_locking_enabled(&self) -> bool {
        *self.shared.document_locking.lock()
    }
}

struct MemoryDocument {
    shared: Arc<Shared>,
    owner: String,
    unid: Unid,
    // handle fetched for a deleted document
    stub: bool,
    working: Mutex<BTreeMap<String, Value>>,
}

impl MemoryDocument {
    fn check_lock(&self, state: &StoreState) -> StoreResult<()> {
        match state.locks.get(&self.unid) {
            Some(holder) if holder != &self.owner => Err(StoreError::Locked {
                unid: self.unid.clone(),
                holder: holder.clone(),
            }),
            _ => Ok(()),
        }
    }
}

impl Document for MemoryDocument {
    fn unid(&self) -> Unid {
        self.unid.clone()
    }

    fn store_id(&self) -> StoreId {
        self.shared.id
    }

    fn item(&self, name: &str) -> StoreResult<Option<Value>> {
        Ok(self.working.lock().get(name).cloned())
    }

    fn replace_item(&self, name: &str, value: Value) -> StoreResult<()> {
        self.working.lock().insert(name.to_owned(), value);
        Ok(())
    }

    fn remove_item(&self, name: &str) -> StoreResult<Option<Value>> {
        Ok(self.working.lock().remove(name))
    }

    fn item_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.working.lock().keys().cloned().collect())
    }

    fn save(&self) -> StoreResult<bool> {
        if self.stub {
            return Err(StoreError::Deleted(self.unid.clone()));
        }
        let items = self.working.lock().clone();
        let mut state = self.shared.state.lock();
        self.check_lock(&state)?;
        if state.fail_saves.contains(&self.unid) {
            drop(state);
            self.shared.record(StoreEvent::SaveFailed(self.unid.clone()));
            return Ok(false);
        }
        let seq = match state.docs.get(&self.unid) {
            Some(existing) => existing.seq,
            None => {
                state.next_seq += 1;
                state.next_seq
            }
        };
        state.tombstones.remove(&self.unid);
        state.docs.insert(self.unid.clone(), PersistedDoc { items, seq });
        drop(state);
        self.shared.record(StoreEvent::Saved(self.unid.clone()));
        Ok(true)
    }

    fn remove_permanently(&self, force: bool) -> StoreResult<()> {
        let mut state = self.shared.state.lock();
        if !force {
            self.check_lock(&state)?;
        }
        state.docs.remove(&self.unid);
        state.locks.remove(&self.unid);
        state.tombstones.insert(self.unid.clone());
        drop(state);
        self.shared.record(StoreEvent::Removed(self.unid.clone()));
        Ok(())
    }

    fn lock(&self) -> StoreResult<bool> {
        let mut state = self.shared.state.lock();
        let refused = state.fail_locks.contains(&self.unid)
            || state
                .locks
                .get(&self.unid)
                .is_some_and(|holder| holder != &self.owner);
        if !refused {
            state.locks.insert(self.unid.clone(), self.owner.clone());
        }
        drop(state);
        if refused {
            self.shared.record(StoreEvent::LockRefused(self.unid.clone()));
            Ok(false)
        } else {
            self.shared.record(StoreEvent::Locked(self.unid.clone()));
            Ok(true)
        }
    }

    fn unlock(&self) -> StoreResult<()> {
        let mut state = self.shared.state.lock();
        let held = state
            .locks
            .get(&self.unid)
            .is_some_and(|holder| holder == &self.owner);
        if held {
            state.locks.remove(&self.unid);
            drop(state);
            self.shared.record(StoreEvent::Unlocked(self.unid.clone()));
        }
        Ok(())
    }

    fn is_deleted(&self) -> bool {
        self.shared.state.lock().tombstones.contains(&self.unid)
    }

    fn revert(&self) -> StoreResult<()> {
        let persisted = self
            .shared
            .state
            .lock()
            .docs
            .get(&self.unid)
            .map(|doc| doc.items.clone())
            .unwrap_or_default();
        *self.working.lock() = persisted;
        self.shared.record(StoreEvent::Reverted(self.unid.clone()));
        Ok(())
    }
}

struct MemoryView {
    shared: Arc<Shared>,
    name: String,
    selection: Selection,
}

impl View for MemoryView {
    fn name(&self) -> &str {
        &self.name
    }

    fn all_entries(&self) -> StoreResult<Vec<Unid>> {
        let state = self.shared.state.lock();
        let mut hits: Vec<(i64, u64, Unid)> = state
            .docs
            .iter()
            .filter(|(_, doc)| self.selection.matches(|name| doc.items.get(name)))
            .map(|(unid, doc)| {
                let created = doc
                    .items
                    .get(CREATED.name())
                    .and_then(Millis::from_value)
                    .map(|m| m.0)
                    .unwrap_or_default();
                (created, doc.seq, unid.clone())
            })
            .collect();
        // newest first, like a view sorted descending on @Created
        hits.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(hits.into_iter().map(|(_, _, unid)| unid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsaved_documents_are_invisible() {
        let store = MemoryStore::new();
        let doc = store.create_document(None).unwrap();
        doc.replace_item("name", Value::from("a")).unwrap();
        assert!(store.document_by_unid(&doc.unid()).unwrap().is_none());
        assert!(doc.save().unwrap());
        let fetched = store.document_by_unid(&doc.unid()).unwrap().unwrap();
        assert_eq!(fetched.item("name").unwrap(), Some(Value::from("a")));
    }

    #[test]
    fn revert_restores_persisted_items() {
        let store = MemoryStore::new();
        let doc = store.create_document(None).unwrap();
        doc.replace_item("n", Value::Int(1)).unwrap();
        doc.save().unwrap();
        doc.replace_item("n", Value::Int(2)).unwrap();
        doc.revert().unwrap();
        assert_eq!(doc.item("n").unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn removed_documents_surface_as_deleted() {
        let store = MemoryStore::new();
        let doc = store.create_document(None).unwrap();
        doc.save().unwrap();
        doc.remove_permanently(true).unwrap();
        let stub = store.document_by_unid(&doc.unid()).unwrap().unwrap();
        assert!(stub.is_deleted());
        assert!(matches!(stub.save(), Err(StoreError::Deleted(_))));
        assert_eq!(store.persisted_count(), 0);
    }

    #[test]
    fn locks_are_per_owner() {
        let store = MemoryStore::with_document_locking();
        let doc = store.create_document(None).unwrap();
        doc.save().unwrap();
        assert!(doc.lock().unwrap());
        let other = store.session("other");
        let theirs = other.document_by_unid(&doc.unid()).unwrap().unwrap();
        assert!(!theirs.lock().unwrap());
        assert!(matches!(theirs.save(), Err(StoreError::Locked { .. })));
        theirs.unlock().unwrap();
        assert_eq!(store.lock_holder(&doc.unid()).as_deref(), Some("default"));
        doc.unlock().unwrap();
        assert!(store.lock_holder(&doc.unid()).is_none());
    }

    #[test]
    fn sessions_share_the_database_identity() {
        let store = MemoryStore::new();
        let doc = store.create_document(None).unwrap();
        assert_eq!(doc.store_id(), store.store_id());
        assert_eq!(store.session("other").store_id(), store.store_id());
        assert_ne!(MemoryStore::new().store_id(), store.store_id());
    }

    #[test]
    fn injected_save_failure_reports_false() {
        let store = MemoryStore::new();
        let doc = store.create_document(None).unwrap();
        store.fail_saves_for(&doc.unid());
        assert!(!doc.save().unwrap());
        assert_eq!(
            store.journal().last(),
            Some(&StoreEvent::SaveFailed(doc.unid()))
        );
    }

    #[test]
    fn views_select_by_field() {
        let store = MemoryStore::new();
        for kind in ["a", "b", "a"] {
            let doc = store.create_document(None).unwrap();
            doc.replace_item("kind", Value::from(kind)).unwrap();
            doc.save().unwrap();
        }
        let view = store
            .create_or_open_view("(A)", &Selection::field_equals("kind", "a"))
            .unwrap();
        assert_eq!(view.all_entries().unwrap().len(), 2);
        let reopened = store.create_or_open_view("(A)", &Selection::All).unwrap();
        assert_eq!(reopened.all_entries().unwrap().len(), 2);
    }
}
