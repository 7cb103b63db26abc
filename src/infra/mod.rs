//! Infrastructure adapters for batch storage and activity ingestion.

pub mod ingest;
pub mod store;

pub use ingest::InMemoryActivitySource;
pub use store::{FileBatchStore, InMemoryBatchStore};
