use std::str::FromStr;

use super::{Config, Secret, VectorBackend};

/// Parsed value of `key`, or `None` when unset. Unparsable values are logged
/// and ignored.
fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {raw}");
            None
        }
    }
}

fn parse_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    Some(
        raw.split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_index();
        self.apply_env_overrides_embedding();
        self.apply_env_overrides_retrieval();
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("TROVE_INDEX_ROOT") {
            self.index.root = v;
        }
        if let Some(n) = parse_env("TROVE_CHUNK_MIN_TOKENS") {
            self.index.chunk_min_tokens = n;
        }
        if let Some(n) = parse_env("TROVE_CHUNK_MAX_TOKENS") {
            self.index.chunk_max_tokens = n;
        }
        if let Ok(v) = std::env::var("TROVE_TOKENIZER_PATH") {
            self.index.tokenizer_path = Some(v).filter(|p| !p.is_empty());
        }
        if let Ok(v) = std::env::var("TROVE_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("TROVE_VECTOR_BACKEND") {
            match v.trim().to_ascii_lowercase().as_str() {
                "sqlite" => self.storage.vector_backend = VectorBackend::Sqlite,
                "memory" => self.storage.vector_backend = VectorBackend::Memory,
                _ => tracing::warn!("ignoring invalid TROVE_VECTOR_BACKEND value: {v}"),
            }
        }
        if let Some(globs) = parse_list("TROVE_DISCOVERY_INCLUDE") {
            self.discovery.include = globs;
        }
        if let Some(globs) = parse_list("TROVE_DISCOVERY_EXCLUDE") {
            self.discovery.exclude = globs;
        }
        if let Some(bytes) = parse_env("TROVE_DISCOVERY_MAX_FILE_SIZE") {
            self.discovery.max_file_size = bytes;
        }
    }

    fn apply_env_overrides_embedding(&mut self) {
        if let Ok(v) = std::env::var("TROVE_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("TROVE_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("TROVE_EMBEDDING_API_KEY")
            && !v.is_empty()
        {
            self.embedding.api_key = Some(Secret::new(v));
        }
        if let Some(n) = parse_env("TROVE_EMBED_MAX_ITEMS_PER_BATCH") {
            self.embedding.max_items_per_batch = n;
        }
        if let Some(n) = parse_env("TROVE_EMBED_MAX_TOKENS_PER_BATCH") {
            self.embedding.max_tokens_per_batch = n;
        }
        if let Some(ms) = parse_env("TROVE_EMBED_BATCH_DELAY_MS") {
            self.embedding.batch_delay_ms = ms;
        }
        if let Some(n) = parse_env("TROVE_EMBED_MAX_RETRIES") {
            self.embedding.max_retries = n;
        }
        if let Some(n) = parse_env("TROVE_EMBED_CONCURRENCY") {
            self.embedding.concurrency = n;
        }
    }

    fn apply_env_overrides_retrieval(&mut self) {
        if let Some(k) = parse_env("TROVE_TOP_K") {
            self.retrieval.top_k = k;
        }
        if let Some(t) = parse_env("TROVE_SCORE_THRESHOLD") {
            self.retrieval.score_threshold = t;
        }
    }
}
