//! Behavior shared by vertices and edges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use super::{Graph, GraphInner};
use crate::error::{GraphError, Result, StoreResultExt};
use crate::schema::{is_reserved, Field, FieldValue};
use crate::store::DocumentRef;
use crate::types::{ElementKind, Unid, Value};

/// State every graph element carries: its owning graph, its document and
/// whether it has been removed in the current unit of work.
///
/// A core is bound to the unit of work it was cached in. Once that unit
/// commits or rolls back the core still reads its document, but every
/// write fails with [`GraphError::TransactionClosed`].
pub struct ElementCore {
    graph: Weak<GraphInner>,
    generation: u64,
    kind: ElementKind,
    unid: Unid,
    doc: DocumentRef,
    removed: AtomicBool,
}

impl ElementCore {
    pub(crate) fn new(
        graph: Weak<GraphInner>,
        generation: u64,
        kind: ElementKind,
        doc: DocumentRef,
    ) -> Self {
        Self {
            graph,
            generation,
            kind,
            unid: doc.unid(),
            doc,
            removed: AtomicBool::new(false),
        }
    }

    /// Document key.
    pub fn unid(&self) -> &Unid {
        &self.unid
    }

    /// Element kind.
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// True once the element has been removed.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn graph(&self) -> Result<Graph> {
        self.graph
            .upgrade()
            .map(Graph::from_inner)
            .ok_or(GraphError::GraphClosed)
    }

    /// The owning graph, provided this element still belongs to its open
    /// unit of work.
    pub(crate) fn live_graph(&self) -> Result<Graph> {
        let graph = self.graph()?;
        graph.ensure_current(self)?;
        Ok(graph)
    }

    pub(crate) fn belongs_to(&self, inner: &Arc<GraphInner>) -> bool {
        std::ptr::eq(self.graph.as_ptr(), Arc::as_ptr(inner))
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn document(&self) -> &DocumentRef {
        &self.doc
    }

    pub(crate) fn value(&self, name: &str) -> Result<Option<Value>> {
        self.doc
            .item(name)
            .context(|| format!("read {name} of {} {}", self.kind, self.unid))
    }

    pub(crate) fn read<T: FieldValue>(&self, field: Field<T>) -> Result<Option<T>> {
        Ok(self.value(field.name())?.as_ref().and_then(T::from_value))
    }

    pub(crate) fn write<T: FieldValue>(&self, field: Field<T>, value: T) -> Result<()> {
        self.write_value(field.name(), value.into_value())
    }

    /// Writes one item and queues the document for saving.
    pub(crate) fn write_value(&self, name: &str, value: Value) -> Result<()> {
        let txn = self.live_graph()?.start_transaction();
        self.doc
            .replace_item(name, value)
            .context(|| format!("write {name} of {} {}", self.kind, self.unid))?;
        txn.queue_update(self.doc.clone())
    }

    /// Queues the document for permanent deletion and marks the element
    /// removed.
    pub(crate) fn remove_document(&self) -> Result<()> {
        let txn = self.live_graph()?.start_transaction();
        txn.queue_remove(self.doc.clone())?;
        self.removed.store(true, Ordering::Release);
        debug!(kind = %self.kind, unid = %self.unid, "graph.element.removed");
        Ok(())
    }
}

impl std::fmt::Debug for ElementCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementCore")
            .field("kind", &self.kind)
            .field("unid", &self.unid)
            .field("removed", &self.is_removed())
            .finish()
    }
}

fn ensure_public(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(GraphError::InvalidArgument("property name is empty".into()));
    }
    if is_reserved(name) {
        return Err(GraphError::ReservedProperty(name.to_owned()));
    }
    Ok(())
}

/// Property access and identity shared by [`Vertex`](super::Vertex) and
/// [`Edge`](super::Edge).
///
/// Writes are deferred: they land in the element's working document and
/// queue it on the graph's open transaction, opening one if needed.
pub trait Element {
    /// Shared element state.
    fn core(&self) -> &ElementCore;

    /// Removes the element through its graph.
    fn remove(&self) -> Result<()>;

    /// External identifier. Equal to the document key.
    fn id(&self) -> &str {
        self.core().unid().as_str()
    }

    /// Document key.
    fn unid(&self) -> &Unid {
        self.core().unid()
    }

    /// Whether this is a vertex or an edge.
    fn kind(&self) -> ElementKind {
        self.core().kind()
    }

    /// True once removed in the current unit of work.
    fn is_removed(&self) -> bool {
        self.core().is_removed()
    }

    /// Reads a property.
    fn property(&self, name: &str) -> Result<Option<Value>> {
        self.core().value(name)
    }

    /// Reads a property converted to `T`; `None` if absent or of another type.
    fn typed<T: FieldValue>(&self, name: &str) -> Result<Option<T>>
    where
        Self: Sized,
    {
        Ok(self.property(name)?.as_ref().and_then(T::from_value))
    }

    /// Sets a property.
    fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<()>
    where
        Self: Sized,
    {
        ensure_public(name)?;
        self.core().write_value(name, value.into())
    }

    /// Appends a text value to a multi-valued property, creating it if
    /// absent.
    fn add_property(&self, name: &str, value: impl Into<Value>) -> Result<()>
    where
        Self: Sized,
    {
        ensure_public(name)?;
        let value = value.into();
        let merged = match (self.property(name)?, value) {
            (None, value) => value,
            (Some(Value::TextList(mut list)), Value::Text(text)) => {
                list.push(text);
                Value::TextList(list)
            }
            (Some(Value::Text(first)), Value::Text(text)) => Value::TextList(vec![first, text]),
            (Some(existing), value) => {
                return Err(GraphError::InvalidArgument(format!(
                    "cannot append {} to {} property {name}",
                    value.kind(),
                    existing.kind()
                )))
            }
        };
        self.core().write_value(name, merged)
    }

    /// Removes a property, returning its previous value.
    fn remove_property(&self, name: &str) -> Result<Option<Value>> {
        ensure_public(name)?;
        let core = self.core();
        let txn = core.live_graph()?.start_transaction();
        let old = core
            .document()
            .remove_item(name)
            .context(|| format!("remove {name} of {} {}", core.kind(), core.unid()))?;
        txn.queue_update(core.document().clone())?;
        Ok(old)
    }

    /// Names of the caller-visible properties.
    fn property_keys(&self) -> Result<Vec<String>> {
        let core = self.core();
        let names = core
            .document()
            .item_names()
            .context(|| format!("list items of {} {}", core.kind(), core.unid()))?;
        Ok(names.into_iter().filter(|n| !is_reserved(n)).collect())
    }

    /// True if the property is present.
    fn has_property(&self, name: &str) -> Result<bool> {
        Ok(self.property(name)?.is_some())
    }

    /// Adds `by` to an integer property (absent counts as zero) and
    /// returns the new value.
    fn increment_property(&self, name: &str, by: i64) -> Result<i64> {
        ensure_public(name)?;
        let current = match self.property(name)? {
            None | Some(Value::Null) => 0,
            Some(Value::Int(n)) => n,
            Some(other) => {
                return Err(GraphError::InvalidArgument(format!(
                    "property {name} holds {}, not an integer",
                    other.kind()
                )))
            }
        };
        let next = current
            .checked_add(by)
            .ok_or_else(|| GraphError::InvalidArgument(format!("property {name} overflows")))?;
        self.core().write_value(name, Value::Int(next))?;
        Ok(next)
    }

    /// Subtracts `by` from an integer property.
    fn decrement_property(&self, name: &str, by: i64) -> Result<i64> {
        let by = by
            .checked_neg()
            .ok_or_else(|| GraphError::InvalidArgument("decrement overflows".into()))?;
        self.increment_property(name, by)
    }
}
