//! Core value types: document keys, property values and directions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length in characters of a universal document identifier.
pub const UNID_LEN: usize = 32;

/// Universal identifier of a document: 32 upper-case hexadecimal digits.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Unid(String);

impl Unid {
    /// Parses `raw` as a UNID, accepting either case. Returns `None` if
    /// `raw` is not exactly 32 hex digits.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == UNID_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Unid(raw.to_ascii_uppercase()))
        } else {
            None
        }
    }

    /// Generates a fresh random UNID.
    pub fn random() -> Self {
        Self::from_bytes(rand::random::<[u8; 16]>())
    }

    /// Renders 16 raw bytes as a UNID.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Unid(hex::encode_upper(bytes))
    }

    /// Borrowed string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Unid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Unid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Unid {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Unid::parse(&value).ok_or_else(|| format!("not a universal id: {value:?}"))
    }
}

impl From<Unid> for String {
    fn from(value: Unid) -> Self {
        value.0
    }
}

/// Property value stored on a document item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Explicit empty value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// Text value.
    Text(String),
    /// Ordered list of text values.
    TextList(Vec<String>),
    /// Timestamp in milliseconds since the Unix epoch.
    DateTime(i64),
}

impl Value {
    /// Returns the text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the integer payload. Floats with no fractional part convert.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the float payload; integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the list payload, if this is a text list.
    pub fn as_text_list(&self) -> Option<&[String]> {
        match self {
            Value::TextList(v) => Some(v),
            _ => None,
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::TextList(_) => "text_list",
            Value::DateTime(_) => "datetime",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::TextList(v) => write!(f, "[{}]", v.join(", ")),
            Value::DateTime(v) => write!(f, "datetime({v})"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::TextList(v)
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::TextList(v.into_iter().map(str::to_owned).collect())
    }
}

/// Direction of an edge relative to a vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Edges pointing at the vertex.
    In,
    /// Edges leaving the vertex.
    Out,
    /// Both directions.
    Both,
}

/// Kind of graph element a document represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Vertex document.
    Vertex,
    /// Edge document.
    Edge,
}

impl ElementKind {
    /// Value persisted in the type discriminator field.
    pub fn discriminator(self) -> &'static str {
        match self {
            ElementKind::Vertex => "OpenVertex",
            ElementKind::Edge => "OpenEdge",
        }
    }

    /// Inverse of [`ElementKind::discriminator`].
    pub fn from_discriminator(raw: &str) -> Option<Self> {
        match raw {
            "OpenVertex" => Some(ElementKind::Vertex),
            "OpenEdge" => Some(ElementKind::Edge),
            _ => None,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Vertex => write!(f, "vertex"),
            ElementKind::Edge => write!(f, "edge"),
        }
    }
}
