//! Vertices and their adjacency sets.
//!
//! A vertex keeps the ids of its incoming and outgoing edges in two
//! insertion-ordered sets. Each set is read from the document the first
//! time it is needed and is never re-read for the lifetime of the wrapper.
//! Mutations only touch memory and raise a dirty flag; the graph writes
//! dirty sets back, together with a count item per set, when it commits.

use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::warn;

use super::element::{Element, ElementCore};
use super::Edge;
use crate::error::{GraphError, Result};
use crate::schema::{
    Field, FieldValue, VERTEX_IN_COUNT, VERTEX_IN_EDGES, VERTEX_OUT_COUNT, VERTEX_OUT_EDGES,
};
use crate::types::Direction;

#[derive(Default)]
struct Adjacency {
    in_edges: Option<IndexSet<String>>,
    out_edges: Option<IndexSet<String>>,
    in_dirty: bool,
    out_dirty: bool,
}

impl Adjacency {
    fn mark_dirty(&mut self, direction: Direction) {
        match direction {
            Direction::In => self.in_dirty = true,
            Direction::Out => self.out_dirty = true,
            Direction::Both => {
                self.in_dirty = true;
                self.out_dirty = true;
            }
        }
    }
}

/// A graph vertex.
pub struct Vertex {
    core: ElementCore,
    adjacency: Mutex<Adjacency>,
}

impl Vertex {
    pub(crate) fn new(core: ElementCore) -> Self {
        Self {
            core,
            adjacency: Mutex::new(Adjacency::default()),
        }
    }

    /// Ids of the edges pointing at this vertex.
    pub fn in_edges(&self) -> Result<Vec<String>> {
        self.edge_ids(Direction::In)
    }

    /// Ids of the edges leaving this vertex.
    pub fn out_edges(&self) -> Result<Vec<String>> {
        self.edge_ids(Direction::Out)
    }

    /// Incoming followed by outgoing edge ids, without duplicates.
    pub fn both_edges(&self) -> Result<Vec<String>> {
        self.edge_ids(Direction::Both)
    }

    /// Edge ids in `direction`.
    pub fn edge_ids(&self, direction: Direction) -> Result<Vec<String>> {
        let mut adj = self.adjacency.lock();
        match direction {
            Direction::Both => {
                let mut both = self.hydrate(&mut adj, Direction::In)?.clone();
                both.extend(self.hydrate(&mut adj, Direction::Out)?.iter().cloned());
                Ok(both.into_iter().collect())
            }
            dir => Ok(self.hydrate(&mut adj, dir)?.iter().cloned().collect()),
        }
    }

    /// Live edges in `direction`, keeping only those whose label is in
    /// `labels` (all of them when `labels` is empty).
    pub fn edges(&self, direction: Direction, labels: &[&str]) -> Result<Vec<Arc<Edge>>> {
        let ids = self.edge_ids(direction)?;
        self.core.graph()?.edges_from_ids(ids, labels)
    }

    /// Vertices at the far end of the edges in `direction`.
    pub fn vertices(&self, direction: Direction, labels: &[&str]) -> Result<Vec<Arc<Vertex>>> {
        let mut found = Vec::new();
        for dir in [Direction::In, Direction::Out] {
            if direction != Direction::Both && direction != dir {
                continue;
            }
            let far = match dir {
                Direction::In => Direction::Out,
                _ => Direction::In,
            };
            for edge in self.edges(dir, labels)? {
                if let Some(vertex) = edge.vertex(far)? {
                    found.push(vertex);
                }
            }
        }
        Ok(found)
    }

    /// Adds an edge labelled `label` from this vertex to `other`.
    pub fn add_edge(&self, label: &str, other: &Vertex) -> Result<Arc<Edge>> {
        self.core.graph()?.add_edge(None, self, other, label)
    }

    /// Records an incoming edge. Returns false if it was already present.
    pub fn add_in_edge(&self, edge_id: &str) -> Result<bool> {
        self.add_edge_id(Direction::In, edge_id)
    }

    /// Records an outgoing edge. Returns false if it was already present.
    pub fn add_out_edge(&self, edge_id: &str) -> Result<bool> {
        self.add_edge_id(Direction::Out, edge_id)
    }

    /// Drops `edge_id` from both sets. Both sets are marked dirty whether
    /// or not they held the id.
    pub fn remove_edge(&self, edge_id: &str) -> Result<()> {
        let graph = self.core.live_graph()?;
        let mut adj = self.adjacency.lock();
        graph.start_transaction();
        self.hydrate(&mut adj, Direction::In)?.shift_remove(edge_id);
        self.hydrate(&mut adj, Direction::Out)?.shift_remove(edge_id);
        adj.mark_dirty(Direction::Both);
        Ok(())
    }

    /// True if either set has unwritten changes.
    pub fn is_dirty(&self) -> bool {
        let adj = self.adjacency.lock();
        adj.in_dirty || adj.out_dirty
    }

    /// Writes every dirty set and its count to the document, clears the
    /// flags and returns the number of items written. A clean vertex
    /// writes nothing.
    pub fn write_edges(&self) -> Result<usize> {
        let mut adj = self.adjacency.lock();
        let mut written = 0;
        if adj.in_dirty {
            let ids = self.hydrate(&mut adj, Direction::In)?;
            written += self.write_set(ids, VERTEX_IN_EDGES, VERTEX_IN_COUNT)?;
            adj.in_dirty = false;
        }
        if adj.out_dirty {
            let ids = self.hydrate(&mut adj, Direction::Out)?;
            written += self.write_set(ids, VERTEX_OUT_EDGES, VERTEX_OUT_COUNT)?;
            adj.out_dirty = false;
        }
        if written > 0 {
            self.core.graph()?.metrics().adjacency_written(written);
        }
        Ok(written)
    }

    fn write_set(
        &self,
        ids: &IndexSet<String>,
        list: Field<Vec<String>>,
        count: Field<i64>,
    ) -> Result<usize> {
        let len = i64::try_from(ids.len())
            .map_err(|_| GraphError::Corruption("adjacency set too large".into()))?;
        self.core.write(list, ids.iter().cloned().collect())?;
        self.core.write(count, len)?;
        Ok(2)
    }

    fn add_edge_id(&self, direction: Direction, edge_id: &str) -> Result<bool> {
        let graph = self.core.live_graph()?;
        let mut adj = self.adjacency.lock();
        if self.hydrate(&mut adj, direction)?.contains(edge_id) {
            return Ok(false);
        }
        graph.start_transaction();
        self.hydrate(&mut adj, direction)?.insert(edge_id.to_owned());
        adj.mark_dirty(direction);
        Ok(true)
    }

    fn hydrate<'a>(
        &self,
        adj: &'a mut Adjacency,
        direction: Direction,
    ) -> Result<&'a mut IndexSet<String>> {
        let (slot, field) = match direction {
            Direction::In => (&mut adj.in_edges, VERTEX_IN_EDGES),
            Direction::Out => (&mut adj.out_edges, VERTEX_OUT_EDGES),
            Direction::Both => {
                return Err(GraphError::InvalidArgument(
                    "adjacency sets are per direction".into(),
                ))
            }
        };
        if slot.is_none() {
            *slot = Some(self.load(field)?);
        }
        Ok(slot.get_or_insert_with(IndexSet::new))
    }

    fn load(&self, field: Field<Vec<String>>) -> Result<IndexSet<String>> {
        let Some(value) = self.core.value(field.name())? else {
            return Ok(IndexSet::new());
        };
        match Vec::<String>::from_value(&value) {
            Some(ids) => Ok(ids.into_iter().collect()),
            None => {
                warn!(
                    unid = %self.core.unid(),
                    field = field.name(),
                    found = value.kind(),
                    "graph.vertex.adjacency_unreadable"
                );
                Ok(IndexSet::new())
            }
        }
    }
}

impl Element for Vertex {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn remove(&self) -> Result<()> {
        self.core.graph()?.remove_vertex(self)
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("unid", self.core.unid())
            .field("removed", &self.core.is_removed())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
