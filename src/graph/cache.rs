//! Identity map for one unit of work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::{Edge, Element, Vertex};
use crate::types::Unid;

/// A cached element of either kind.
#[derive(Clone)]
pub(crate) enum CachedElement {
    Vertex(Arc<Vertex>),
    Edge(Arc<Edge>),
}

impl CachedElement {
    pub(crate) fn is_removed(&self) -> bool {
        match self {
            CachedElement::Vertex(v) => v.core().is_removed(),
            CachedElement::Edge(e) => e.core().is_removed(),
        }
    }
}

/// Maps document keys to the single live wrapper for that document.
///
/// Entries are kept in insertion order so the commit flush visits
/// vertices deterministically. Every [`clear`](Self::clear) starts a new
/// generation; wrappers remember the generation they were cached under.
#[derive(Default)]
pub(crate) struct ElementCache {
    entries: Mutex<IndexMap<Unid, CachedElement>>,
    generation: AtomicU64,
}

impl ElementCache {
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn get(&self, unid: &Unid) -> Option<CachedElement> {
        self.entries.lock().get(unid).cloned()
    }

    /// Inserts `element` unless another thread got there first, and returns
    /// whichever entry ends up cached.
    pub(crate) fn insert(&self, unid: Unid, element: CachedElement) -> CachedElement {
        self.entries.lock().entry(unid).or_insert(element).clone()
    }

    pub(crate) fn vertices(&self) -> Vec<Arc<Vertex>> {
        self.entries
            .lock()
            .values()
            .filter_map(|entry| match entry {
                CachedElement::Vertex(v) => Some(Arc::clone(v)),
                CachedElement::Edge(_) => None,
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        dropped
    }
}
