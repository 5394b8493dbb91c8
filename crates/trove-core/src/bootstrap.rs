//! Component construction from a resolved [`Config`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use trove_index::{
    Chunker, Document, EmbeddingBatcher, HeuristicTokenCounter, IndexStore, Indexer, Retriever,
    SearchFilter, TokenCounter,
};
use trove_llm::{EmbeddingProvider, HttpEmbeddingProvider};
use trove_memory::{InMemoryVectorStore, SqliteStore, SqliteVectorStore, VectorStore};

use crate::config::{Config, VectorBackend};

/// Priority: `--config` flag > `TROVE_CONFIG` env > `trove.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_owned();
    }
    if let Ok(path) = std::env::var("TROVE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("trove.toml")
}

/// Load, override and validate.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed or a setting is invalid.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn create_provider(config: &Config) -> anyhow::Result<HttpEmbeddingProvider> {
    let e = &config.embedding;
    let client = trove_llm::http::build_client(
        std::time::Duration::from_secs(e.connect_timeout_secs),
        std::time::Duration::from_secs(e.request_timeout_secs),
    )?;
    let api_key = e.api_key.as_ref().map(|k| k.expose().to_owned());
    if api_key.is_none() {
        tracing::debug!("no TROVE_EMBEDDING_API_KEY set, sending unauthenticated requests");
    }
    let mut provider = HttpEmbeddingProvider::with_client(client, &e.base_url, api_key, &e.model);
    if let (Some(document), Some(query)) = (&e.document_input_type, &e.query_input_type) {
        provider = provider.with_input_types(document, query);
    }
    Ok(provider)
}

/// Token counter for chunking and batch budgets.
///
/// # Errors
///
/// Returns an error if a configured tokenizer file cannot be loaded.
pub fn create_token_counter(config: &Config) -> anyhow::Result<Arc<dyn TokenCounter>> {
    match config.index.tokenizer_path.as_deref() {
        #[cfg(feature = "hf-tokenizer")]
        Some(path) => {
            let counter = trove_index::HfTokenCounter::from_file(Path::new(path))?;
            Ok(Arc::new(counter))
        }
        #[cfg(not(feature = "hf-tokenizer"))]
        Some(path) => {
            tracing::warn!(
                tokenizer = path,
                "built without hf-tokenizer, falling back to estimated token counts"
            );
            Ok(Arc::new(HeuristicTokenCounter))
        }
        None => Ok(Arc::new(HeuristicTokenCounter)),
    }
}

/// Open the index store for `model` at the configured location.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or was built with
/// another model.
pub async fn open_store(config: &Config, model: &str) -> anyhow::Result<Arc<IndexStore>> {
    let path = config.storage.sqlite_path.as_str();
    if path != ":memory:"
        && let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let sqlite = SqliteStore::new(path)
        .await
        .with_context(|| format!("opening index database {path}"))?;
    let vectors: Arc<dyn VectorStore> = match config.storage.vector_backend {
        VectorBackend::Sqlite => Arc::new(SqliteVectorStore::new(sqlite.pool().clone())),
        VectorBackend::Memory => Arc::new(InMemoryVectorStore::new()),
    };
    let store = IndexStore::open(vectors, sqlite, model).await?;
    tracing::debug!(path, model, "index store opened");
    Ok(Arc::new(store))
}

/// # Errors
///
/// Returns an error if the chunking or batching settings are invalid.
pub fn build_indexer<P: EmbeddingProvider + 'static>(
    config: &Config,
    store: Arc<IndexStore>,
    provider: Arc<P>,
) -> anyhow::Result<Indexer<P>> {
    let chunker = Chunker::new(config.chunker_config(), create_token_counter(config)?)?;
    let batcher = EmbeddingBatcher::new(provider, config.batcher_config())?;
    Ok(Indexer::new(store, chunker, batcher)?)
}

/// # Errors
///
/// Returns an error if the retrieval settings are invalid.
pub fn build_retriever<P: EmbeddingProvider>(
    config: &Config,
    store: Arc<IndexStore>,
    provider: Arc<P>,
) -> anyhow::Result<Retriever<P>> {
    Ok(Retriever::new(store, provider, config.retrieval_config())?)
}

/// Search filter from the configured metadata filter plus `key=value` pairs.
///
/// # Errors
///
/// Returns an error for a pair without `=`.
pub fn build_filter(config: &Config, pairs: &[String]) -> anyhow::Result<SearchFilter> {
    let mut metadata = config.retrieval.metadata_filter.clone();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("filter {pair:?} is not key=value"))?;
        let key = key.trim();
        if key == "file_path" {
            // repeated file_path filters mean "any of"
            continue;
        }
        metadata.insert(key.to_owned(), value.trim().to_owned());
    }
    let file_paths: Vec<String> = pairs
        .iter()
        .filter_map(|p| p.split_once('='))
        .filter(|(k, _)| k.trim() == "file_path")
        .map(|(_, v)| v.trim().to_owned())
        .collect();
    Ok(SearchFilter {
        metadata,
        file_paths: (!file_paths.is_empty()).then_some(file_paths),
    })
}

/// Walk `root` with the configured discovery rules off the async runtime.
///
/// # Errors
///
/// Returns an error if `root` is not a directory or a glob is invalid.
pub async fn discover_documents(root: &Path, config: &Config) -> anyhow::Result<Vec<Document>> {
    let root = root.to_owned();
    let discovery = config.discovery_config();
    let docs = tokio::task::spawn_blocking(move || trove_index::discover(&root, &discovery))
        .await
        .context("discovery task panicked")??;
    Ok(docs)
}
