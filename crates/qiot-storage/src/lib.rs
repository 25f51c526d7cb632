//! Storage for QIoT.
//!
//! - Document storage for sensors and experiments ([`DocumentStore`]) with
//!   in-memory and redb backends
//! - Object ids compatible with previously exported documents
//! - Time-series reads ([`TimeSeriesBackend`]) with an InfluxDB client
//! - Dashboard query compilation

pub mod backends;
pub mod document;
pub mod error;
pub mod influx;
pub mod object_id;
pub mod query;
pub mod timeseries;

pub use backends::{open_document_store, MemoryDocumentStore, RedbDocumentStore};
pub use document::{collections, Document, DocumentStore, Filter, ID_KEY};
pub use error::{Result, StorageError};
pub use influx::InfluxClient;
pub use object_id::ObjectId;
pub use query::{compile_queries, QueryDescriptor, QueryResult};
pub use timeseries::{SeriesQuery, TimeSeries, TimeSeriesBackend};
