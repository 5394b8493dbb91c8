//! Embedding provider abstraction and the HTTP backend used by Trove.

pub mod compatible;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod provider;

pub use compatible::HttpEmbeddingProvider;
pub use error::EmbedError;
pub use provider::EmbeddingProvider;
