use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Wrapper for sensitive strings with redacted Debug/Display.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Directory indexed when the CLI gets no `--root`.
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_chunk_min_tokens")]
    pub chunk_min_tokens: usize,
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    /// `tokenizer.json` for exact counts; requires the `hf-tokenizer` feature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<String>,
}

fn default_root() -> String {
    ".".into()
}

fn default_chunk_min_tokens() -> usize {
    128
}

fn default_chunk_max_tokens() -> usize {
    512
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            chunk_min_tokens: default_chunk_min_tokens(),
            chunk_max_tokens: default_chunk_max_tokens(),
            tokenizer_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Voyage-style `input_type` sent while indexing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_input_type: Option<String>,
    /// Voyage-style `input_type` sent for search queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_input_type: Option<String>,
    #[serde(default = "default_max_items_per_batch")]
    pub max_items_per_batch: usize,
    #[serde(default = "default_max_tokens_per_batch")]
    pub max_tokens_per_batch: usize,
    /// Minimum spacing between batch starts.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Only ever read from `TROVE_EMBEDDING_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<Secret>,
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_max_items_per_batch() -> usize {
    96
}

fn default_max_tokens_per_batch() -> usize {
    16_384
}

fn default_batch_delay_ms() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    4
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_concurrency() -> usize {
    2
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            document_input_type: None,
            query_input_type: None,
            max_items_per_batch: default_max_items_per_batch(),
            max_tokens_per_batch: default_max_tokens_per_batch(),
            batch_delay_ms: default_batch_delay_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            concurrency: default_concurrency(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub score_threshold: f32,
    #[serde(default = "default_template")]
    pub template: String,
    /// Applied to every search in addition to CLI filters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata_filter: BTreeMap<String, String>,
}

fn default_top_k() -> usize {
    5
}

fn default_template() -> String {
    trove_index::DEFAULT_TEMPLATE.into()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: 0.0,
            template: default_template(),
            metadata_filter: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Vectors live in the same `SQLite` file as the records.
    #[default]
    Sqlite,
    /// Vectors are lost on exit; for experiments. Only valid with an
    /// in-memory `sqlite_path`.
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default)]
    pub vector_backend: VectorBackend,
}

fn default_sqlite_path() -> String {
    ".trove/index.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            vector_backend: VectorBackend::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub follow_links: bool,
    #[serde(default = "default_respect_gitignore")]
    pub respect_gitignore: bool,
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_respect_gitignore() -> bool {
    true
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            max_file_size: default_max_file_size(),
            include_hidden: false,
            follow_links: false,
            respect_gitignore: default_respect_gitignore(),
        }
    }
}
