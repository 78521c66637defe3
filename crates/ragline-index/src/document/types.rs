use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scalar-valued metadata attached to documents, records, and collections.
pub type Metadata = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Convert a JSON scalar; arrays, objects and null have no metadata form.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A raw text unit submitted for indexing. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    content: String,
    metadata: Metadata,
}

impl Document {
    /// Build a document whose id is derived from its content, so the same
    /// text always maps to the same id.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, content.as_bytes()).to_string();
        Self {
            id,
            content,
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Contiguous slice of a document. `start` and `end` are character offsets
/// into the document content, end exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    /// Record id: stable for a given document id and chunk position.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}:{}", self.document_id, self.chunk_index)
    }
}
