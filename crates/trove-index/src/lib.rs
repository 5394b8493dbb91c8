//! Incremental semantic indexing over a tree of documents.
//!
//! Documents are split into token-bounded chunks along declaration and
//! paragraph boundaries, only files whose content changed are re-embedded,
//! embedding calls are batched under item and token ceilings with pacing and
//! retry, and each file's chunks are replaced atomically in the index store.

pub mod batcher;
pub mod changes;
pub mod chunker;
pub mod discovery;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod retriever;
pub mod retry;
pub mod store;
pub mod tokens;

pub use batcher::{BatchOutcome, BatchResult, BatcherConfig, EmbeddingBatcher};
pub use changes::{ChangeSet, Document, classify, fingerprint};
pub use chunker::{Chunk, ChunkStrategy, Chunker, ChunkerConfig};
pub use discovery::{DiscoveryConfig, discover};
pub use error::{IndexError, Result};
pub use indexer::{FileOutcome, FileStatus, Indexer, PassReport};
pub use retriever::{DEFAULT_TEMPLATE, RetrievalConfig, Retriever, format_results};
pub use retry::RetryPolicy;
pub use store::{
    ConsistencyReport, EmbeddedChunk, IndexStats, IndexStore, Recovery, SearchFilter,
    SearchResult,
};
#[cfg(feature = "hf-tokenizer")]
pub use tokens::HfTokenCounter;
pub use tokens::{HeuristicTokenCounter, TokenCounter, WhitespaceTokenCounter};
