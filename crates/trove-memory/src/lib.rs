//! SQLite-backed persistence for Trove: file records, index metadata and
//! vector rows.

pub mod error;
pub mod in_memory_store;
pub mod sqlite;
pub mod types;
pub mod vector_store;

pub use error::MemoryError;
pub use in_memory_store::InMemoryVectorStore;
pub use sqlite::SqliteStore;
pub use sqlite::vectors::SqliteVectorStore;
pub use types::{FileRecord, IndexMeta};
pub use vector_store::{
    FieldCondition, FieldValue, ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore,
    VectorStoreError,
};
