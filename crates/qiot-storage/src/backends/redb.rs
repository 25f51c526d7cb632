//! Redb document store.
//!
//! Each collection is a table keyed by document id; values are the
//! JSON-serialized documents.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use crate::document::{ensure_id, Document, DocumentStore, Filter, ID_KEY};
use crate::error::{Result, StorageError};

fn table(name: &str) -> TableDefinition<'_, &'static str, Vec<u8>> {
    TableDefinition::new(name)
}

/// Persistent document store backed by a redb file.
#[derive(Clone)]
pub struct RedbDocumentStore {
    db: Arc<Database>,
}

impl RedbDocumentStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = path_ref.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Database::create(path_ref)?
        };
        tracing::info!(category = "storage", "Document store opened at {}", path_ref.display());
        Ok(Self { db: Arc::new(db) })
    }
}

fn decode(bytes: &[u8]) -> Result<Document> {
    Ok(serde_json::from_slice(bytes)?)
}

#[async_trait]
impl DocumentStore for RedbDocumentStore {
    async fn select(&self, filter: &Filter, collection: &str) -> Result<Vec<Document>> {
        let db = self.db.clone();
        let filter = filter.clone();
        let collection = collection.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<Document>> {
            let read_txn = db.begin_read()?;
            let table = match read_txn.open_table(table(&collection)) {
                Ok(t) => t,
                Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            if let Some(id) = filter.id() {
                let Some(value) = table.get(id)? else {
                    return Ok(Vec::new());
                };
                let doc = decode(value.value().as_slice())?;
                return Ok(if filter.matches(&doc) { vec![doc] } else { Vec::new() });
            }

            let mut docs = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let doc = decode(value.value().as_slice())?;
                if filter.matches(&doc) {
                    docs.push(doc);
                }
            }
            Ok(docs)
        })
        .await?
    }

    async fn insert(&self, mut document: Document, collection: &str) -> Result<String> {
        let db = self.db.clone();
        let collection = collection.to_string();

        tokio::task::spawn_blocking(move || -> Result<String> {
            let id = ensure_id(&mut document)?;
            let serialized = serde_json::to_vec(&document)?;

            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(table(&collection))?;
                let exists = table.get(id.as_str())?.is_some();
                if exists {
                    return Err(StorageError::Duplicate(id));
                }
                table.insert(id.as_str(), serialized)?;
            }
            write_txn.commit()?;
            Ok(id)
        })
        .await?
    }

    async fn replace(&self, filter: &Filter, mut document: Document, collection: &str) -> Result<u64> {
        let db = self.db.clone();
        let filter = filter.clone();
        let collection = collection.to_string();

        tokio::task::spawn_blocking(move || -> Result<u64> {
            let write_txn = db.begin_write()?;
            let modified = {
                let mut table = write_txn.open_table(table(&collection))?;

                let mut matched: Option<(String, Document)> = None;
                for entry in table.iter()? {
                    let (key, value) = entry?;
                    let doc = decode(value.value().as_slice())?;
                    if filter.matches(&doc) {
                        matched = Some((key.value().to_string(), doc));
                        break;
                    }
                }

                match matched {
                    None => 0,
                    Some((id, existing)) => {
                        document.insert(ID_KEY.to_string(), serde_json::Value::String(id.clone()));
                        if existing == document {
                            0
                        } else {
                            table.insert(id.as_str(), serde_json::to_vec(&document)?)?;
                            1
                        }
                    }
                }
            };
            write_txn.commit()?;
            Ok(modified)
        })
        .await?
    }
}
