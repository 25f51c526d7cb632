//! Document store backends.
//!
//! - [`MemoryDocumentStore`]: process-local, for tests and dry runs
//! - [`RedbDocumentStore`]: persistent, one redb table per collection

pub mod memory;
pub mod redb;

pub use self::memory::MemoryDocumentStore;
pub use self::redb::RedbDocumentStore;

use std::path::Path;
use std::sync::Arc;

use crate::document::DocumentStore;
use crate::error::Result;

/// Open the persistent store at `path`.
pub fn open_document_store(path: impl AsRef<Path>) -> Result<Arc<dyn DocumentStore>> {
    Ok(Arc::new(RedbDocumentStore::open(path)?))
}
