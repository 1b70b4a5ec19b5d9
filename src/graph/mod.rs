//! Property graph over a document store.
//!
//! Every vertex and every edge is one store document, tagged with a type
//! discriminator item so views can select each kind. A [`Graph`] keeps an
//! identity map so that, within one unit of work, each document is
//! represented by exactly one [`Vertex`] or [`Edge`] instance.
//!
//! # Units of work
//!
//! The first mutating call opens a [`DatabaseTransaction`]; later calls
//! reuse it. [`Graph::commit`] writes every dirty adjacency set, drains the
//! transaction and clears the identity map. [`Graph::rollback`] does the
//! same without the adjacency writes. Either way the next lookup goes back
//! to the store.
//!
//! Element handles belong to the unit of work they were looked up in. A
//! handle kept past commit or rollback can still be read, but writing or
//! removing through it fails with [`GraphError::TransactionClosed`]; look
//! the element up again instead.
//!
//! ```
//! use docgraph::{Direction, Element, Graph, GraphOptions, MemoryStore};
//!
//! let graph = Graph::open(MemoryStore::new(), GraphOptions::default());
//! let alice = graph.add_vertex(Some("alice"))?;
//! let bob = graph.add_vertex(Some("bob"))?;
//! alice.add_edge("knows", &bob)?;
//! assert!(graph.commit()?.is_clean());
//!
//! let alice = graph.get_vertex("alice")?.expect("persisted");
//! assert_eq!(alice.edges(Direction::Out, &["knows"])?.len(), 1);
//! # Ok::<(), docgraph::GraphError>(())
//! ```
//!
//! # Threads
//!
//! A graph is `Send + Sync` and may be shared. Commit and rollback are
//! serialized by an internal mutex, and enqueueing is safe from any thread,
//! but the identity map is shared by all callers: one unit of work per
//! graph at a time.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::GraphOptions;
use crate::error::{GraphError, Result, StoreResultExt};
use crate::ids::{self, ElementKey, ResolvedKey};
use crate::metrics::{default_metrics, GraphMetrics};
use crate::schema::{FieldValue, Millis, CREATED, GRAPH_TYPE, SOURCE_KEY};
use crate::store::{DocumentRef, DocumentStore, Selection};
use crate::txn::{CommitReport, DatabaseTransaction, TxState};
use crate::types::{Direction, ElementKind, Unid, Value};

mod cache;
mod edge;
mod element;
mod vertex;

use cache::{CachedElement, ElementCache};

pub use edge::Edge;
pub use element::{Element, ElementCore};
pub use vertex::Vertex;

/// Capabilities of the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Features {
    /// Several edges may join the same pair of vertices.
    pub supports_duplicate_edges: bool,
    /// An edge may start and end at the same vertex.
    pub supports_self_loops: bool,
    /// Caller-supplied ids are honored.
    pub ignores_supplied_ids: bool,
    /// Key/value indices are available.
    pub supports_indices: bool,
    /// Key/value lookups on vertices or edges are available.
    pub supports_key_indices: bool,
    /// Mutations are grouped into units of work.
    pub supports_transactions: bool,
    /// Several threads may run independent units of work on one graph.
    pub supports_threaded_transactions: bool,
    /// All vertices can be enumerated.
    pub supports_vertex_iteration: bool,
    /// All edges can be enumerated.
    pub supports_edge_iteration: bool,
    /// Edges can be fetched by id.
    pub supports_edge_retrieval: bool,
    /// Vertices carry properties.
    pub supports_vertex_properties: bool,
    /// Edges carry properties.
    pub supports_edge_properties: bool,
    /// Data outlives the process.
    pub is_persistent: bool,
}

const FEATURES: Features = Features {
    supports_duplicate_edges: true,
    supports_self_loops: true,
    ignores_supplied_ids: false,
    supports_indices: false,
    supports_key_indices: false,
    supports_transactions: true,
    supports_threaded_transactions: false,
    supports_vertex_iteration: true,
    supports_edge_iteration: true,
    supports_edge_retrieval: true,
    supports_vertex_properties: true,
    supports_edge_properties: true,
    is_persistent: true,
};

pub(crate) struct GraphInner {
    store: Arc<dyn DocumentStore>,
    options: GraphOptions,
    metrics: Arc<dyn GraphMetrics>,
    locking: bool,
    txn: Mutex<Option<Arc<DatabaseTransaction>>>,
    lifecycle: Mutex<()>,
    cache: ElementCache,
}

/// Handle to a graph. Cloning is cheap and yields a handle to the same
/// graph.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    /// Opens a graph over `store`.
    pub fn open<S: DocumentStore + 'static>(store: S, options: GraphOptions) -> Self {
        Self::with_store(Arc::new(store), options)
    }

    /// Opens a graph over a shared store handle.
    pub fn with_store(store: Arc<dyn DocumentStore>, options: GraphOptions) -> Self {
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        let locking = options
            .document_locking
            .unwrap_or_else(|| store.document_locking_enabled());
        debug!(
            locking,
            policy = ?options.commit_policy,
            vertex_view = %options.vertex_view_name,
            edge_view = %options.edge_view_name,
            "graph.open"
        );
        Self {
            inner: Arc::new(GraphInner {
                store,
                options,
                metrics,
                locking,
                txn: Mutex::new(None),
                lifecycle: Mutex::new(()),
                cache: ElementCache::default(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<GraphInner>) -> Self {
        Self { inner }
    }

    /// Options the graph was opened with.
    pub fn options(&self) -> &GraphOptions {
        &self.inner.options
    }

    /// Metrics sink in use.
    pub fn metrics(&self) -> &Arc<dyn GraphMetrics> {
        &self.inner.metrics
    }

    /// Whether queued documents are locked.
    pub fn document_locking(&self) -> bool {
        self.inner.locking
    }

    /// Capability descriptor.
    pub fn features(&self) -> Features {
        FEATURES
    }

    /// Number of elements in the identity map.
    pub fn cached_elements(&self) -> usize {
        self.inner.cache.len()
    }

    /// Returns the open transaction, opening one if none is.
    pub fn start_transaction(&self) -> Arc<DatabaseTransaction> {
        let mut slot = self.inner.txn.lock();
        if let Some(txn) = slot.as_ref() {
            if txn.state() == TxState::Open {
                return Arc::clone(txn);
            }
        }
        let txn = Arc::new(DatabaseTransaction::new(
            Arc::clone(&self.inner.store),
            self.inner.options.commit_policy,
            self.inner.locking,
            Arc::clone(&self.inner.metrics),
        ));
        debug!(txn = txn.id(), "graph.txn.start");
        *slot = Some(Arc::clone(&txn));
        txn
    }

    /// The open transaction, if any.
    pub fn current_transaction(&self) -> Option<Arc<DatabaseTransaction>> {
        self.inner.txn.lock().clone()
    }

    /// True while a unit of work is open.
    pub fn is_in_transaction(&self) -> bool {
        self.inner.txn.lock().is_some()
    }

    /// Opens a unit of work bound to the returned guard.
    pub fn unit_of_work(&self) -> UnitOfWork<'_> {
        self.start_transaction();
        UnitOfWork {
            graph: self,
            finished: false,
        }
    }

    /// Writes dirty adjacency sets, commits the open transaction and clears
    /// the identity map. The map is cleared even when the commit fails.
    pub fn commit(&self) -> Result<CommitReport> {
        let _lifecycle = self.inner.lifecycle.lock();
        let result = self
            .flush_adjacency()
            .and_then(|()| match self.take_transaction() {
                Some(txn) => txn.commit(),
                None => Ok(CommitReport::default()),
            });
        if let Err(err) = &result {
            warn!(error = %err, "graph.commit.failed");
            if let Some(txn) = self.take_transaction() {
                if let Err(err) = txn.rollback() {
                    warn!(error = %err, "graph.rollback.failed");
                }
            }
        }
        let cleared = self.inner.cache.clear();
        if let Ok(report) = &result {
            info!(
                elements = report.outcomes.len(),
                failed = report.failures().count(),
                aborted = report.aborted,
                cleared,
                "graph.commit"
            );
        }
        result
    }

    /// Reverts the open transaction and clears the identity map.
    pub fn rollback(&self) -> Result<CommitReport> {
        let _lifecycle = self.inner.lifecycle.lock();
        let result = match self.take_transaction() {
            Some(txn) => txn.rollback(),
            None => Ok(CommitReport::default()),
        };
        let cleared = self.inner.cache.clear();
        info!(cleared, "graph.rollback");
        result
    }

    /// Commits whatever is pending.
    pub fn shutdown(&self) -> Result<CommitReport> {
        self.commit()
    }

    // Elements must come from this graph and from its current unit of work.
    pub(crate) fn ensure_current(&self, core: &ElementCore) -> Result<()> {
        if !core.belongs_to(&self.inner) {
            return Err(GraphError::InvalidArgument(format!(
                "{} {} belongs to another graph",
                core.kind(),
                core.unid()
            )));
        }
        if core.generation() != self.inner.cache.generation() {
            debug!(kind = %core.kind(), unid = %core.unid(), "graph.element.stale");
            return Err(GraphError::TransactionClosed);
        }
        Ok(())
    }

    fn take_transaction(&self) -> Option<Arc<DatabaseTransaction>> {
        self.inner.txn.lock().take()
    }

    fn flush_adjacency(&self) -> Result<()> {
        if !self.inner.options.flush_adjacency_on_commit {
            return Ok(());
        }
        let mut written = 0;
        for vertex in self.inner.cache.vertices() {
            if !vertex.is_removed() {
                written += vertex.write_edges()?;
            }
        }
        debug!(written, "graph.adjacency.flush");
        Ok(())
    }

    /// Looks up a vertex by external id. `None` if it does not exist, was
    /// removed, or the id cannot name an element.
    pub fn get_vertex<K: ElementKey + ?Sized>(&self, id: &K) -> Result<Option<Arc<Vertex>>> {
        match self.lookup(id, ElementKind::Vertex)? {
            Some(CachedElement::Vertex(vertex)) if !vertex.is_removed() => Ok(Some(vertex)),
            _ => Ok(None),
        }
    }

    /// Looks up an edge by external id.
    pub fn get_edge<K: ElementKey + ?Sized>(&self, id: &K) -> Result<Option<Arc<Edge>>> {
        match self.lookup(id, ElementKind::Edge)? {
            Some(CachedElement::Edge(edge)) if !edge.is_removed() => Ok(Some(edge)),
            _ => Ok(None),
        }
    }

    /// Adds a vertex, or returns the existing one when `id` already names
    /// a vertex. Without an id a fresh document key is assigned.
    pub fn add_vertex(&self, id: Option<&str>) -> Result<Arc<Vertex>> {
        let key = id.map(resolve_for_add::<str>).transpose()?;
        self.add_vertex_at(key)
    }

    /// Adds a vertex under any [`ElementKey`], or returns the existing one.
    pub fn add_vertex_with_key<K: ElementKey + ?Sized>(&self, id: &K) -> Result<Arc<Vertex>> {
        self.add_vertex_at(Some(resolve_for_add(id)?))
    }

    fn add_vertex_at(&self, key: Option<ResolvedKey>) -> Result<Arc<Vertex>> {
        self.start_transaction();
        match self.open_or_create(key, ElementKind::Vertex)? {
            CachedElement::Vertex(vertex) => {
                debug!(unid = %vertex.unid(), "graph.vertex.added");
                Ok(vertex)
            }
            CachedElement::Edge(edge) => Err(GraphError::InvalidArgument(format!(
                "{} names an edge",
                edge.unid()
            ))),
        }
    }

    /// Adds an edge labelled `label` from `out` to `in_vertex`. Without an
    /// id the edge key is derived from both endpoint ids and the label, so
    /// the same triple always maps to the same edge document.
    pub fn add_edge(
        &self,
        id: Option<&str>,
        out: &Vertex,
        in_vertex: &Vertex,
        label: &str,
    ) -> Result<Arc<Edge>> {
        let key = match id {
            Some(raw) => resolve_for_add(raw)?,
            None => resolve_for_add(&ids::edge_key(out.id(), label, in_vertex.id()))?,
        };
        self.add_edge_at(key, out, in_vertex, label)
    }

    /// Adds an edge under any [`ElementKey`], or rebinds the existing one.
    pub fn add_edge_with_key<K: ElementKey + ?Sized>(
        &self,
        id: &K,
        out: &Vertex,
        in_vertex: &Vertex,
        label: &str,
    ) -> Result<Arc<Edge>> {
        self.add_edge_at(resolve_for_add(id)?, out, in_vertex, label)
    }

    fn add_edge_at(
        &self,
        key: ResolvedKey,
        out: &Vertex,
        in_vertex: &Vertex,
        label: &str,
    ) -> Result<Arc<Edge>> {
        if label.trim().is_empty() {
            return Err(GraphError::InvalidArgument("edge label is empty".into()));
        }
        self.ensure_current(out.core())?;
        self.ensure_current(in_vertex.core())?;
        self.start_transaction();
        let edge = match self.open_or_create(Some(key), ElementKind::Edge)? {
            CachedElement::Edge(edge) => edge,
            CachedElement::Vertex(vertex) => {
                return Err(GraphError::InvalidArgument(format!(
                    "{} names a vertex",
                    vertex.unid()
                )))
            }
        };
        edge.set_label(label)?;
        edge.relate(in_vertex, out)?;
        debug!(
            unid = %edge.unid(),
            label,
            tail = out.id(),
            head = in_vertex.id(),
            "graph.edge.added"
        );
        Ok(edge)
    }

    /// Returns an edge labelled `label` from `out` to `in_vertex`, creating
    /// it only if none exists. Safe to retry.
    pub fn get_or_add_edge(
        &self,
        id: Option<&str>,
        out: &Vertex,
        in_vertex: &Vertex,
        label: &str,
    ) -> Result<Arc<Edge>> {
        if let Some(raw) = id {
            return match self.get_edge(raw)? {
                Some(edge) => {
                    self.ensure_current(out.core())?;
                    self.ensure_current(in_vertex.core())?;
                    edge.set_label(label)?;
                    edge.relate(in_vertex, out)?;
                    Ok(edge)
                }
                None => self.add_edge(Some(raw), out, in_vertex, label),
            };
        }
        let derived = ids::edge_key(out.id(), label, in_vertex.id());
        if let Some(edge) = self.get_edge(&derived)? {
            edge.set_label(label)?;
            edge.relate(in_vertex, out)?;
            return Ok(edge);
        }
        for edge in out.edges(Direction::Out, &[label])? {
            if edge.vertex_id(Direction::In)?.as_deref() == Some(in_vertex.id()) {
                edge.set_label(label)?;
                edge.relate(in_vertex, out)?;
                return Ok(edge);
            }
        }
        self.add_edge(None, out, in_vertex, label)
    }

    /// Removes a vertex after removing every edge incident to it.
    pub fn remove_vertex(&self, vertex: &Vertex) -> Result<()> {
        self.ensure_current(vertex.core())?;
        if vertex.is_removed() {
            return Ok(());
        }
        self.start_transaction();
        let incident = vertex.both_edges()?;
        debug!(unid = %vertex.unid(), edges = incident.len(), "graph.vertex.remove");
        for edge_id in incident {
            match self.get_edge(&edge_id)? {
                Some(edge) => self.remove_edge(&edge)?,
                None => vertex.remove_edge(&edge_id)?,
            }
        }
        vertex.core().remove_document()
    }

    /// Detaches an edge from both endpoints and queues its document for
    /// deletion.
    pub fn remove_edge(&self, edge: &Edge) -> Result<()> {
        self.ensure_current(edge.core())?;
        if edge.is_removed() {
            return Ok(());
        }
        self.start_transaction();
        for direction in [Direction::In, Direction::Out] {
            if let Some(vertex) = edge.vertex(direction)? {
                vertex.remove_edge(edge.id())?;
            }
        }
        edge.core().remove_document()
    }

    /// Every persisted vertex, newest first.
    pub fn vertices(&self) -> Result<Vec<Arc<Vertex>>> {
        let unids = self.scan(&self.inner.options.vertex_view_name, ElementKind::Vertex)?;
        let mut found = Vec::with_capacity(unids.len());
        for unid in unids {
            if let Some(vertex) = self.get_vertex(unid.as_str())? {
                found.push(vertex);
            }
        }
        Ok(found)
    }

    /// Every persisted edge, newest first.
    pub fn edges(&self) -> Result<Vec<Arc<Edge>>> {
        let unids = self.scan(&self.inner.options.edge_view_name, ElementKind::Edge)?;
        self.edges_from_ids(unids.iter().map(|u| u.as_str()), &[])
    }

    /// Key/value vertex queries are not available.
    pub fn vertices_by(&self, _key: &str, _value: &Value) -> Result<Vec<Arc<Vertex>>> {
        Err(GraphError::Unsupported("vertex lookup by property"))
    }

    /// Key/value edge queries are not available.
    pub fn edges_by(&self, _key: &str, _value: &Value) -> Result<Vec<Arc<Edge>>> {
        Err(GraphError::Unsupported("edge lookup by property"))
    }

    /// Resolves edge ids, keeping edges whose label is in `labels` (every
    /// edge when `labels` is empty). Ids that no longer resolve are skipped.
    pub fn edges_from_ids<I, S>(&self, ids: I, labels: &[&str]) -> Result<Vec<Arc<Edge>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut found = Vec::new();
        for id in ids {
            let id: &str = id.as_ref();
            let Some(edge) = self.get_edge(id)? else {
                continue;
            };
            let keep = labels.is_empty()
                || edge
                    .label()?
                    .is_some_and(|label| labels.contains(&label.as_str()));
            if keep {
                found.push(edge);
            }
        }
        Ok(found)
    }

    fn scan(&self, view_name: &str, kind: ElementKind) -> Result<Vec<Unid>> {
        let selection = Selection::field_equals(GRAPH_TYPE.name(), kind.into_value());
        let view = self
            .inner
            .store
            .create_or_open_view(view_name, &selection)
            .context(|| format!("open view {view_name}"))?;
        view.all_entries()
            .context(|| format!("scan view {view_name}"))
    }

    fn lookup<K: ElementKey + ?Sized>(
        &self,
        raw: &K,
        kind: ElementKind,
    ) -> Result<Option<CachedElement>> {
        let Some(key) = raw.resolve_key()? else {
            warn!(id = ?raw, %kind, "graph.id.invalid");
            return Ok(None);
        };
        if let Some(hit) = self.inner.cache.get(key.unid()) {
            self.inner.metrics.cache_hit();
            return Ok(Some(hit));
        }
        self.inner.metrics.cache_miss();
        let Some(doc) = self.fetch(&key)? else {
            return Ok(None);
        };
        if stored_kind(&doc)?.is_some_and(|stored| stored != kind) {
            return Ok(None);
        }
        Ok(Some(self.cache(doc, kind)))
    }

    fn open_or_create(&self, key: Option<ResolvedKey>, kind: ElementKind) -> Result<CachedElement> {
        let element = match &key {
            Some(key) => match self.inner.cache.get(key.unid()) {
                Some(hit) if hit.is_removed() => {
                    return Err(GraphError::InvalidArgument(format!(
                        "{} was removed in this unit of work",
                        key.unid()
                    )))
                }
                Some(hit) => hit,
                None => match self.fetch(key)? {
                    Some(doc) => {
                        if stored_kind(&doc)?.is_some_and(|stored| stored != kind) {
                            return Err(GraphError::InvalidArgument(format!(
                                "{} is not a {kind} document",
                                key.unid()
                            )));
                        }
                        self.cache(doc, kind)
                    }
                    None => self.create(Some(key), kind)?,
                },
            },
            None => self.create(None, kind)?,
        };
        let core = match &element {
            CachedElement::Vertex(v) => v.core(),
            CachedElement::Edge(e) => e.core(),
        };
        if core.kind() == kind {
            core.write(GRAPH_TYPE, kind)?;
        }
        Ok(element)
    }

    fn fetch(&self, key: &ResolvedKey) -> Result<Option<DocumentRef>> {
        let doc = self
            .inner
            .store
            .document_by_unid(key.unid())
            .context(|| format!("fetch {}", key.unid()))?;
        let Some(doc) = doc.filter(|d| !d.is_deleted()) else {
            return Ok(None);
        };
        if let Some(requested) = key.source_key() {
            if self.inner.options.detect_key_collisions {
                let stored = doc
                    .item(SOURCE_KEY.name())
                    .context(|| format!("read {} of {}", SOURCE_KEY.name(), key.unid()))?;
                let stored = stored.as_ref().and_then(String::from_value);
                if stored.is_some_and(|stored| stored != requested) {
                    warn!(key = requested, unid = %key.unid(), "graph.id.collision");
                    return Err(GraphError::KeyCollision {
                        key: requested.to_owned(),
                        unid: key.unid().clone(),
                    });
                }
            }
        }
        Ok(Some(doc))
    }

    fn create(&self, key: Option<&ResolvedKey>, kind: ElementKind) -> Result<CachedElement> {
        let doc = self
            .inner
            .store
            .create_document(key.map(|k| k.unid().clone()))
            .context(|| format!("create {kind} document"))?;
        let element = self.cache(doc, kind);
        let core = match &element {
            CachedElement::Vertex(v) => v.core(),
            CachedElement::Edge(e) => e.core(),
        };
        if let Some(source) = key.and_then(ResolvedKey::source_key) {
            core.write(SOURCE_KEY, source.to_owned())?;
        }
        if core.read(CREATED)?.is_none() {
            core.write(CREATED, Millis::now())?;
        }
        Ok(element)
    }

    fn cache(&self, doc: DocumentRef, kind: ElementKind) -> CachedElement {
        let unid = doc.unid();
        let core = ElementCore::new(
            Arc::downgrade(&self.inner),
            self.inner.cache.generation(),
            kind,
            doc,
        );
        let element = match kind {
            ElementKind::Vertex => CachedElement::Vertex(Arc::new(Vertex::new(core))),
            ElementKind::Edge => CachedElement::Edge(Arc::new(Edge::new(core))),
        };
        self.inner.cache.insert(unid, element)
    }
}

fn resolve_for_add<K: ElementKey + ?Sized>(id: &K) -> Result<ResolvedKey> {
    id.resolve_key()?
        .ok_or_else(|| GraphError::InvalidArgument(format!("invalid id {id:?}")))
}

fn stored_kind(doc: &DocumentRef) -> Result<Option<ElementKind>> {
    let value = doc
        .item(GRAPH_TYPE.name())
        .context(|| format!("read {} of {}", GRAPH_TYPE.name(), doc.unid()))?;
    Ok(value.as_ref().and_then(ElementKind::from_value))
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("options", &self.inner.options)
            .field("locking", &self.inner.locking)
            .field("in_transaction", &self.is_in_transaction())
            .field("cached", &self.cached_elements())
            .finish()
    }
}

/// A unit of work bound to a scope.
///
/// Conclude it with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback); dropping it without either rolls back.
pub struct UnitOfWork<'g> {
    graph: &'g Graph,
    finished: bool,
}

impl<'g> UnitOfWork<'g> {
    /// The graph this unit of work runs against.
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Commits and ends the unit of work.
    pub fn commit(mut self) -> Result<CommitReport> {
        self.finished = true;
        self.graph.commit()
    }

    /// Rolls back and ends the unit of work.
    pub fn rollback(mut self) -> Result<CommitReport> {
        self.finished = true;
        self.graph.rollback()
    }
}

impl Deref for UnitOfWork<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        self.graph
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("graph.unit_of_work.dropped");
        if let Err(err) = self.graph.rollback() {
            warn!(error = %err, "graph.rollback.failed");
        }
    }
}
