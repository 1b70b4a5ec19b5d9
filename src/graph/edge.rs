//! Edges and their endpoint bindings.

use std::sync::Arc;

use parking_lot::Mutex;

use super::element::{Element, ElementCore};
use super::Vertex;
use crate::error::{GraphError, Result};
use crate::schema::{EDGE_IN, EDGE_LABEL, EDGE_OUT};
use crate::types::Direction;

#[derive(Default)]
struct Endpoints {
    label: Option<String>,
    in_id: Option<String>,
    out_id: Option<String>,
}

/// A directed, labelled graph edge.
///
/// Endpoint ids are written to the edge document as soon as they are set,
/// so [`Edge::vertex`] resolves correctly before anything is flushed.
pub struct Edge {
    core: ElementCore,
    endpoints: Mutex<Endpoints>,
}

impl Edge {
    pub(crate) fn new(core: ElementCore) -> Self {
        Self {
            core,
            endpoints: Mutex::new(Endpoints::default()),
        }
    }

    /// Edge label, if one has been stored.
    pub fn label(&self) -> Result<Option<String>> {
        if let Some(label) = &self.endpoints.lock().label {
            return Ok(Some(label.clone()));
        }
        let stored = self.core.read(EDGE_LABEL)?;
        if let Some(label) = &stored {
            self.endpoints.lock().label = Some(label.clone());
        }
        Ok(stored)
    }

    pub(crate) fn set_label(&self, label: &str) -> Result<()> {
        self.core.write(EDGE_LABEL, label.to_owned())?;
        self.endpoints.lock().label = Some(label.to_owned());
        Ok(())
    }

    /// Id of the endpoint vertex in `direction`.
    pub fn vertex_id(&self, direction: Direction) -> Result<Option<String>> {
        let field = match direction {
            Direction::In => EDGE_IN,
            Direction::Out => EDGE_OUT,
            Direction::Both => {
                return Err(GraphError::InvalidArgument(
                    "an edge endpoint is either in or out".into(),
                ))
            }
        };
        {
            let ends = self.endpoints.lock();
            let cached = match direction {
                Direction::In => &ends.in_id,
                _ => &ends.out_id,
            };
            if cached.is_some() {
                return Ok(cached.clone());
            }
        }
        self.core.read(field)
    }

    /// Endpoint vertex in `direction`, resolved through the graph. `None`
    /// if the endpoint was never set or no longer exists.
    pub fn vertex(&self, direction: Direction) -> Result<Option<Arc<Vertex>>> {
        match self.vertex_id(direction)? {
            Some(id) => self.core.graph()?.get_vertex(&id),
            None => Ok(None),
        }
    }

    /// Binds both endpoints: `out` first, then `in_vertex`.
    pub fn relate(&self, in_vertex: &Vertex, out: &Vertex) -> Result<()> {
        self.set_out_doc(out)?;
        self.set_in_doc(in_vertex)
    }

    /// Makes `vertex` the tail of this edge and registers the edge in its
    /// outgoing set.
    pub fn set_out_doc(&self, vertex: &Vertex) -> Result<()> {
        self.core.live_graph()?;
        vertex.add_out_edge(self.id())?;
        let id = vertex.id().to_owned();
        self.endpoints.lock().out_id = Some(id.clone());
        self.core.write(EDGE_OUT, id)
    }

    /// Makes `vertex` the head of this edge and registers the edge in its
    /// incoming set.
    pub fn set_in_doc(&self, vertex: &Vertex) -> Result<()> {
        self.core.live_graph()?;
        vertex.add_in_edge(self.id())?;
        let id = vertex.id().to_owned();
        self.endpoints.lock().in_id = Some(id.clone());
        self.core.write(EDGE_IN, id)
    }
}

impl Element for Edge {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn remove(&self) -> Result<()> {
        self.core.graph()?.remove_edge(self)
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ends = self.endpoints.lock();
        f.debug_struct("Edge")
            .field("unid", self.core.unid())
            .field("label", &ends.label)
            .field("out", &ends.out_id)
            .field("in", &ends.in_id)
            .finish()
    }
}
