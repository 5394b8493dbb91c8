mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};
use std::time::Duration;

use trove_index::{BatcherConfig, ChunkerConfig, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
            toml::from_str::<Self>(&content)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: trove_index::IndexError| ConfigError::Invalid(e.to_string());
        self.chunker_config().validate().map_err(invalid)?;
        self.batcher_config().validate().map_err(invalid)?;
        self.retrieval_config().validate().map_err(invalid)?;

        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.model must not be empty".into()));
        }
        if !self.embedding.base_url.starts_with("http://")
            && !self.embedding.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "embedding.base_url must be an http(s) URL, got {:?}",
                self.embedding.base_url
            )));
        }
        if self.embedding.document_input_type.is_some() != self.embedding.query_input_type.is_some()
        {
            return Err(ConfigError::Invalid(
                "embedding.document_input_type and query_input_type must be set together".into(),
            ));
        }
        if self.embedding.request_timeout_secs == 0 || self.embedding.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("embedding timeouts must be positive".into()));
        }
        if self.storage.sqlite_path.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.sqlite_path must not be empty".into()));
        }
        // records would outlive the vectors they point at
        if self.storage.vector_backend == VectorBackend::Memory
            && self.storage.sqlite_path != ":memory:"
        {
            return Err(ConfigError::Invalid(
                "storage.vector_backend = \"memory\" requires storage.sqlite_path = \":memory:\""
                    .into(),
            ));
        }
        if self.discovery.max_file_size == 0 {
            return Err(ConfigError::Invalid(
                "discovery.max_file_size must be positive".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            min_tokens: self.index.chunk_min_tokens,
            max_tokens: self.index.chunk_max_tokens,
        }
    }

    #[must_use]
    pub fn batcher_config(&self) -> BatcherConfig {
        let e = &self.embedding;
        BatcherConfig {
            max_items: e.max_items_per_batch,
            max_tokens_per_batch: e.max_tokens_per_batch,
            batch_delay: Duration::from_millis(e.batch_delay_ms),
            concurrency: e.concurrency,
            retry: RetryPolicy {
                max_retries: e.max_retries,
                base_backoff: Duration::from_millis(e.backoff_base_ms),
                max_backoff: Duration::from_millis(e.backoff_max_ms),
            },
        }
    }

    #[must_use]
    pub fn retrieval_config(&self) -> trove_index::RetrievalConfig {
        trove_index::RetrievalConfig {
            top_k: self.retrieval.top_k,
            score_threshold: self.retrieval.score_threshold,
            template: self.retrieval.template.clone(),
        }
    }

    #[must_use]
    pub fn discovery_config(&self) -> trove_index::DiscoveryConfig {
        let d = &self.discovery;
        trove_index::DiscoveryConfig {
            include: d.include.clone(),
            exclude: d.exclude.clone(),
            max_file_size: d.max_file_size,
            include_hidden: d.include_hidden,
            follow_links: d.follow_links,
            respect_gitignore: d.respect_gitignore,
        }
    }
}
