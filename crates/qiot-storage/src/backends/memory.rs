//! In-memory document store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{ensure_id, Document, DocumentStore, Filter, ID_KEY};
use crate::error::{Result, StorageError};

/// Document store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn select(&self, filter: &Filter, collection: &str) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }

    async fn insert(&self, mut document: Document, collection: &str) -> Result<String> {
        let id = ensure_id(&mut document)?;
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(StorageError::Duplicate(id));
        }
        docs.insert(id.clone(), document);
        Ok(id)
    }

    async fn replace(&self, filter: &Filter, mut document: Document, collection: &str) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let Some((id, existing)) = docs.iter_mut().find(|(_, doc)| filter.matches(doc)) else {
            return Ok(0);
        };
        document.insert(ID_KEY.to_string(), serde_json::Value::String(id.clone()));
        if *existing == document {
            return Ok(0);
        }
        *existing = document;
        Ok(1)
    }
}
