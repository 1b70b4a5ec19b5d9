//! Typed access to the reserved document items the graph layer persists.
//!
//! Graph bookkeeping lives in ordinary document items. Each one is declared
//! here as a [`Field`] with a Rust type, so element code reads and writes
//! `Field<Vec<String>>` rather than a bare name and an untyped [`Value`].

use std::marker::PhantomData;

use crate::types::{ElementKind, Value};

/// Conversion between a Rust type and a stored [`Value`].
pub trait FieldValue: Sized {
    /// Converts into the stored representation.
    fn into_value(self) -> Value;
    /// Reads back from a stored value; `None` if the stored type differs.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FieldValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_text().map(str::to_owned)
    }
}

impl FieldValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_int()
    }
}

impl FieldValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FieldValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_float()
    }
}

impl FieldValue for Vec<String> {
    fn into_value(self) -> Value {
        Value::TextList(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::TextList(items) => Some(items.clone()),
            Value::Text(single) => Some(vec![single.clone()]),
            _ => None,
        }
    }
}

impl FieldValue for ElementKind {
    fn into_value(self) -> Value {
        Value::Text(self.discriminator().to_owned())
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_text().and_then(ElementKind::from_discriminator)
    }
}

/// Timestamp in milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Millis(pub i64);

impl Millis {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        Millis((nanos / 1_000_000) as i64)
    }
}

impl FieldValue for Millis {
    fn into_value(self) -> Value {
        Value::DateTime(self.0)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::DateTime(ms) | Value::Int(ms) => Some(Millis(*ms)),
            _ => None,
        }
    }
}

/// A named document item holding values of type `T`.
pub struct Field<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Field<T> {
    /// Declares a field.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Item name in the document.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> std::fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

/// Type discriminator separating vertex documents from edge documents.
pub const GRAPH_TYPE: Field<ElementKind> = Field::new("_OPEN_GRAPHTYPE");
/// Edge label.
pub const EDGE_LABEL: Field<String> = Field::new("_OPEN_LABEL");
/// Id of the vertex an edge points at.
pub const EDGE_IN: Field<String> = Field::new("_OPEN_IN");
/// Id of the vertex an edge leaves.
pub const EDGE_OUT: Field<String> = Field::new("_OPEN_OUT");
/// Incoming edge ids of a vertex. Shares its item name with [`EDGE_IN`];
/// the two never live on the same document.
pub const VERTEX_IN_EDGES: Field<Vec<String>> = Field::new("_OPEN_IN");
/// Outgoing edge ids of a vertex.
pub const VERTEX_OUT_EDGES: Field<Vec<String>> = Field::new("_OPEN_OUT");
/// Cardinality companion of [`VERTEX_IN_EDGES`].
pub const VERTEX_IN_COUNT: Field<i64> = Field::new("_OPEN_IN_COUNT");
/// Cardinality companion of [`VERTEX_OUT_EDGES`].
pub const VERTEX_OUT_COUNT: Field<i64> = Field::new("_OPEN_OUT_COUNT");
/// Source key a derived UNID was hashed from.
pub const SOURCE_KEY: Field<String> = Field::new("_OPEN_KEY");
/// Creation stamp of documents created by the graph.
pub const CREATED: Field<Millis> = Field::new("$Created");

const RESERVED: &[&str] = &[
    GRAPH_TYPE.name(),
    EDGE_LABEL.name(),
    EDGE_IN.name(),
    EDGE_OUT.name(),
    VERTEX_IN_COUNT.name(),
    VERTEX_OUT_COUNT.name(),
    SOURCE_KEY.name(),
    CREATED.name(),
];

/// True if `name` is an item the graph layer manages itself.
pub fn is_reserved(name: &str) -> bool {
    RESERVED.iter().any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Default name of the view selecting vertex documents.
pub const VERTEX_VIEW_NAME: &str = "(_OPEN_Vertices)";
/// Default name of the view selecting edge documents.
pub const EDGE_VIEW_NAME: &str = "(_OPEN_Edges)";
