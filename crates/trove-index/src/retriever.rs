//! Query-time retrieval: embed the query, rank committed chunks, render them.

use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

use trove_llm::EmbeddingProvider;

use crate::error::{IndexError, Result};
use crate::store::{IndexStore, SearchFilter, SearchResult};

/// Rendering used by [`format_results`] when none is configured.
pub const DEFAULT_TEMPLATE: &str = "## {file_path} (relevance: {score:.2})\n{content}\n\n---";

/// Retrieval configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum cosine similarity to accept.
    pub score_threshold: f32,
    pub template: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.0,
            template: DEFAULT_TEMPLATE.into(),
        }
    }
}

impl RetrievalConfig {
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] for a zero `top_k` or a threshold
    /// outside `[-1, 1]`, [`IndexError::Template`] for a bad template.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(IndexError::Configuration("top_k must be positive".into()));
        }
        if !(-1.0..=1.0).contains(&self.score_threshold) {
            return Err(IndexError::Configuration(format!(
                "score_threshold {} is outside [-1, 1]",
                self.score_threshold
            )));
        }
        parse_template(&self.template).map(|_| ())
    }
}

pub struct Retriever<P> {
    store: Arc<IndexStore>,
    provider: Arc<P>,
    config: RetrievalConfig,
}

impl<P: EmbeddingProvider> Retriever<P> {
    /// # Errors
    ///
    /// Returns an error if `config` is invalid, or
    /// [`IndexError::Configuration`] if the provider model differs from the
    /// model the store was opened for.
    pub fn new(store: Arc<IndexStore>, provider: Arc<P>, config: RetrievalConfig) -> Result<Self> {
        config.validate()?;
        let model = provider.model();
        if model != store.model() {
            return Err(IndexError::Configuration(format!(
                "query model {model:?} differs from index model {:?}",
                store.model()
            )));
        }
        Ok(Self {
            store,
            provider,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Best `top_k` committed chunks for `query`, highest score first.
    ///
    /// # Errors
    ///
    /// [`IndexError::Configuration`] for `top_k == 0`,
    /// [`IndexError::Embedding`] if the query cannot be embedded,
    /// [`IndexError::DimensionMismatch`] if the provider changed dimension.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(IndexError::Configuration("top_k must be positive".into()));
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.provider.embed_query(query).await?;
        // headroom for duplicates removed below
        let hits = self
            .store
            .query(&vector, top_k.saturating_mul(2), filter)
            .await?;

        let mut ids = HashSet::new();
        let mut texts = HashSet::new();
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .filter(|h| h.score >= self.config.score_threshold)
            .filter(|h| ids.insert(h.chunk_id.clone()) && texts.insert(h.text.clone()))
            .collect();
        results.truncate(top_k);
        tracing::debug!(query_len = query.len(), results = results.len(), "search finished");
        Ok(results)
    }

    /// [`Retriever::search`] with the configured `top_k`, rendered with the
    /// configured template.
    ///
    /// # Errors
    ///
    /// Same as [`Retriever::search`].
    pub async fn search_formatted(&self, query: &str, filter: &SearchFilter) -> Result<String> {
        let results = self.search(query, self.config.top_k, filter).await?;
        format_results(&results, &self.config.template)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    FilePath,
    Score(Option<usize>),
    Content,
    ChunkIndex,
}

fn parse_template(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(IndexError::Template(format!(
                                "unclosed placeholder {{{field}"
                            )));
                        }
                    }
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(placeholder(&field)?);
            }
            '}' => return Err(IndexError::Template("unmatched '}'".into())),
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn placeholder(field: &str) -> Result<Segment> {
    let (name, spec) = match field.split_once(':') {
        Some((name, spec)) => (name, Some(spec)),
        None => (field, None),
    };
    match (name, spec) {
        ("file_path", None) => Ok(Segment::FilePath),
        ("content", None) => Ok(Segment::Content),
        ("chunk_index", None) => Ok(Segment::ChunkIndex),
        ("score", None) => Ok(Segment::Score(None)),
        ("score", Some(spec)) => spec
            .strip_prefix('.')
            .and_then(|p| p.parse().ok())
            .map(|p| Segment::Score(Some(p)))
            .ok_or_else(|| IndexError::Template(format!("unsupported format {{{field}}}"))),
        (_, Some(_)) if matches!(name, "file_path" | "content" | "chunk_index") => Err(
            IndexError::Template(format!("{{{name}}} takes no format spec")),
        ),
        _ => Err(IndexError::Template(format!("unknown placeholder {{{field}}}"))),
    }
}

/// Render results with `template`, one block per result, joined by newlines.
///
/// Placeholders: `{file_path}`, `{score}` (or `{score:.N}`), `{content}`,
/// `{chunk_index}`. Literal braces are written `{{` and `}}`.
///
/// # Errors
///
/// Returns [`IndexError::Template`] for an unknown or malformed placeholder.
pub fn format_results(results: &[SearchResult], template: &str) -> Result<String> {
    let segments = parse_template(template)?;
    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for segment in &segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::FilePath => out.push_str(&result.file_path),
                Segment::Content => out.push_str(&result.text),
                Segment::ChunkIndex => {
                    let _ = write!(out, "{}", result.ordinal);
                }
                Segment::Score(None) => {
                    let _ = write!(out, "{}", result.score);
                }
                Segment::Score(Some(precision)) => {
                    let _ = write!(out, "{:.*}", precision, result.score);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use trove_llm::mock::MockEmbedder;
    use trove_memory::{InMemoryVectorStore, SqliteStore};

    use super::*;
    use crate::chunker::{Chunk, chunk_id};
    use crate::store::EmbeddedChunk;

    fn result(path: &str, ordinal: usize, text: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk_id: chunk_id(path, ordinal),
            file_path: path.into(),
            ordinal,
            text: text.into(),
            score,
            metadata: BTreeMap::new(),
        }
    }

    async fn seeded(mock: &MockEmbedder, texts: &[(&str, &str)]) -> Arc<IndexStore> {
        let sqlite = SqliteStore::new(":memory:").await.unwrap();
        let store = IndexStore::open(Arc::new(InMemoryVectorStore::new()), sqlite, &mock.model)
            .await
            .unwrap();
        for (path, body) in texts {
            let chunks = body
                .split("\n\n")
                .enumerate()
                .map(|(ordinal, text)| EmbeddedChunk {
                    chunk: Chunk {
                        id: chunk_id(path, ordinal),
                        file_path: (*path).into(),
                        ordinal,
                        text: text.into(),
                        token_count: 1,
                        metadata: BTreeMap::from([
                            ("file_path".to_owned(), (*path).to_owned()),
                            ("ordinal".to_owned(), ordinal.to_string()),
                        ]),
                    },
                    vector: mock.vector_for(text),
                })
                .collect();
            store.upsert_file(path, "fp", chunks).await.unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn exact_text_ranks_first() {
        let mock = MockEmbedder::new(64);
        let store = seeded(
            &mock,
            &[
                ("a.md", "rust ownership and borrowing"),
                ("b.md", "python garbage collection\n\ngo channels and goroutines"),
            ],
        )
        .await;
        let retriever =
            Retriever::new(store, Arc::new(mock.clone()), RetrievalConfig::default()).unwrap();

        let hits = retriever
            .search("go channels and goroutines", 3, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].file_path, "b.md");
        assert_eq!(hits[0].ordinal, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn identical_text_is_deduplicated() {
        let mock = MockEmbedder::new(32);
        let store = seeded(
            &mock,
            &[("a.md", "shared license text"), ("b.md", "shared license text")],
        )
        .await;
        let retriever =
            Retriever::new(store, Arc::new(mock.clone()), RetrievalConfig::default()).unwrap();
        let hits = retriever
            .search("shared license text", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "a.md");
    }

    #[tokio::test]
    async fn empty_query_skips_embedding() {
        let mock = MockEmbedder::new(8);
        let store = seeded(&mock, &[("a.md", "text")]).await;
        let retriever =
            Retriever::new(store, Arc::new(mock.clone()), RetrievalConfig::default()).unwrap();
        let hits = retriever.search("   ", 3, &SearchFilter::default()).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected() {
        let mock = MockEmbedder::new(8);
        let store = seeded(&mock, &[]).await;
        let retriever =
            Retriever::new(store, Arc::new(mock), RetrievalConfig::default()).unwrap();
        let err = retriever
            .search("anything", 0, &SearchFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));
    }

    #[tokio::test]
    async fn threshold_drops_weak_hits() {
        let mock = MockEmbedder::new(256);
        let store = seeded(&mock, &[("a.md", "apples oranges\n\nzebra quantum")]).await;
        let config = RetrievalConfig {
            score_threshold: 0.5,
            ..RetrievalConfig::default()
        };
        let retriever = Retriever::new(store, Arc::new(mock.clone()), config).unwrap();
        let hits = retriever
            .search("apples oranges", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.score >= 0.5));
        assert_eq!(hits[0].text, "apples oranges");
    }

    #[tokio::test]
    async fn rejects_provider_of_another_model() {
        let store = seeded(&MockEmbedder::new(8), &[("a.md", "text")]).await;
        let other = MockEmbedder::new(8).with_model("other-embed");
        assert!(matches!(
            Retriever::new(store, Arc::new(other), RetrievalConfig::default()),
            Err(IndexError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn provider_dimension_change_is_reported() {
        let store = seeded(&MockEmbedder::new(8), &[("a.md", "text")]).await;
        let retriever = Retriever::new(
            store,
            Arc::new(MockEmbedder::new(16)),
            RetrievalConfig::default(),
        )
        .unwrap();
        let err = retriever
            .search("text", 1, &SearchFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 8, actual: 16 }));
    }

    #[test]
    fn default_template_renders() {
        let out = format_results(&[result("src/lib.rs", 0, "fn main() {}", 0.876)], DEFAULT_TEMPLATE)
            .unwrap();
        assert_eq!(out, "## src/lib.rs (relevance: 0.88)\nfn main() {}\n\n---");
    }

    #[test]
    fn all_placeholders_and_escapes() {
        let out = format_results(
            &[result("a.md", 3, "body", 0.5), result("b.md", 0, "more", 0.3)],
            "{{{file_path}#{chunk_index}}} {score:.1}: {content}",
        )
        .unwrap();
        assert_eq!(out, "{a.md#3} 0.5: body\n{b.md#0} 0.3: more");
    }

    #[test]
    fn empty_results_render_empty() {
        assert_eq!(format_results(&[], DEFAULT_TEMPLATE).unwrap(), "");
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        for bad in ["{path}", "{score:x}", "{content:.2}", "{file_path", "stray }"] {
            assert!(
                matches!(format_results(&[], bad), Err(IndexError::Template(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn config_validation() {
        assert!(RetrievalConfig::default().validate().is_ok());
        let zero = RetrievalConfig {
            top_k: 0,
            ..RetrievalConfig::default()
        };
        assert!(zero.validate().is_err());
        let bad_template = RetrievalConfig {
            template: "{nope}".into(),
            ..RetrievalConfig::default()
        };
        assert!(matches!(bad_template.validate(), Err(IndexError::Template(_))));
    }
}
