//! Document store abstraction.
//!
//! Sensors and experiments are stored as schemaless JSON objects keyed by
//! their `_id`, grouped in named collections.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Result, StorageError};
use crate::object_id::ObjectId;

/// A stored JSON object.
pub type Document = Map<String, Value>;

/// Key holding a document's id.
pub const ID_KEY: &str = "_id";

/// Collection names.
pub mod collections {
    /// Sensor definitions.
    pub const SENSORS: &str = "configurations";
    pub const EXPERIMENTS: &str = "experiments";
}

/// Field-equality filter. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Match every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match the document with this id.
    pub fn by_id(id: &ObjectId) -> Self {
        Self::all().eq(ID_KEY, Value::String(id.to_hex()))
    }

    /// Additionally require `key == value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    /// The id this filter pins, if any.
    pub fn id(&self) -> Option<&str> {
        self.conditions
            .iter()
            .find(|(k, _)| k == ID_KEY)
            .and_then(|(_, v)| v.as_str())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| doc.get(key) == Some(value))
    }
}

/// Id of a stored document.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_KEY).and_then(Value::as_str)
}

/// Assign an id to `doc` if it has none and return it.
///
/// A supplied id must parse as an [`ObjectId`] and is stored in its
/// canonical lowercase form, so later lookups by id find the document.
pub fn ensure_id(doc: &mut Document) -> Result<String> {
    match doc.get(ID_KEY) {
        Some(Value::String(raw)) => {
            let id = ObjectId::parse_str(raw)?.to_hex();
            doc.insert(ID_KEY.to_string(), Value::String(id.clone()));
            Ok(id)
        }
        Some(other) => Err(StorageError::InvalidDocument(format!(
            "{} must be a string, got {}",
            ID_KEY, other
        ))),
        None => {
            let id = ObjectId::new().to_hex();
            doc.insert(ID_KEY.to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}

/// Persistent JSON document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents of `collection` matching `filter`, in id order.
    async fn select(&self, filter: &Filter, collection: &str) -> Result<Vec<Document>>;

    /// Store a new document and return its id.
    async fn insert(&self, document: Document, collection: &str) -> Result<String>;

    /// Replace the first document matching `filter`, keeping its id.
    ///
    /// Returns the number of documents whose content changed: 0 when
    /// nothing matched or the replacement is identical.
    async fn replace(&self, filter: &Filter, document: Document, collection: &str)
        -> Result<u64>;
}
