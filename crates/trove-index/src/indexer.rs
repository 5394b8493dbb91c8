//! Indexing orchestrator: classify → chunk → embed → commit per file.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use trove_llm::EmbeddingProvider;

use crate::batcher::{Batch, BatchOutcome, EmbeddingBatcher};
use crate::changes::{Document, classify};
use crate::chunker::{Chunk, Chunker};
use crate::error::{IndexError, Result};
use crate::store::{EmbeddedChunk, IndexStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Unchanged,
    Indexed { chunks: usize },
    Deleted,
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub path: String,
    pub status: FileStatus,
}

impl FileOutcome {
    fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

/// Summary of one indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// One entry per discovered or previously indexed file, ordered by path.
    pub outcomes: Vec<FileOutcome>,
    pub embed_calls: usize,
    pub chunks_embedded: usize,
    pub duration_ms: u64,
}

impl PassReport {
    /// `true` when no file failed or was cancelled.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| !matches!(o.status, FileStatus::Failed { .. } | FileStatus::Cancelled))
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, FileStatus::Failed { .. }))
    }

    #[must_use]
    pub fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// A changed file waiting for the vectors of its chunks.
struct PendingFile {
    fingerprint: String,
    chunks: Vec<Chunk>,
    vectors: HashMap<String, Vec<f32>>,
    settled: Option<FileStatus>,
}

impl PendingFile {
    fn is_complete(&self) -> bool {
        self.settled.is_none() && self.vectors.len() == self.chunks.len()
    }
}

/// Orchestrates incremental passes over a document set.
pub struct Indexer<P> {
    store: Arc<IndexStore>,
    chunker: Chunker,
    batcher: EmbeddingBatcher<P>,
}

impl<P: EmbeddingProvider + 'static> Indexer<P> {
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] if the provider model differs from
    /// the model the store was opened for.
    pub fn new(
        store: Arc<IndexStore>,
        chunker: Chunker,
        batcher: EmbeddingBatcher<P>,
    ) -> Result<Self> {
        let model = batcher.provider().model();
        if model != store.model() {
            return Err(IndexError::Configuration(format!(
                "provider model {model:?} differs from index model {:?}",
                store.model()
            )));
        }
        Ok(Self {
            store,
            chunker,
            batcher,
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    #[must_use]
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Bring the index in line with `documents`.
    ///
    /// Per-file failures are reported in the [`PassReport`]; the pass itself
    /// only fails for invalid input or an unavailable store.
    ///
    /// # Errors
    ///
    /// [`IndexError::Configuration`] for duplicate paths,
    /// [`IndexError::Store`] if the committed records cannot be loaded.
    pub async fn run_pass(
        &self,
        documents: Vec<Document>,
        cancel: CancellationToken,
    ) -> Result<PassReport> {
        let start = std::time::Instant::now();
        let calls_before = self.batcher.calls();

        let mut seen = HashSet::with_capacity(documents.len());
        if let Some(dup) = documents.iter().find(|d| !seen.insert(d.path.as_str())) {
            return Err(IndexError::Configuration(format!(
                "duplicate document path: {}",
                dup.path
            )));
        }

        let records = self
            .store
            .records()
            .await?
            .into_iter()
            .map(|r| (r.file_path.clone(), r))
            .collect();
        let changes = classify(&documents, &records);
        tracing::info!(
            unchanged = changes.unchanged.len(),
            modified = changes.modified.len(),
            new = changes.new.len(),
            deleted = changes.deleted.len(),
            "indexing pass started"
        );

        let mut outcomes: Vec<FileOutcome> = changes
            .unchanged
            .iter()
            .map(|p| FileOutcome::new(p, FileStatus::Unchanged))
            .collect();

        for path in &changes.deleted {
            let status = if cancel.is_cancelled() {
                FileStatus::Cancelled
            } else {
                match self.store.delete_file(path).await {
                    Ok(_) => {
                        tracing::info!(file = %path, "removed");
                        FileStatus::Deleted
                    }
                    Err(e) => failed(path, &e),
                }
            };
            outcomes.push(FileOutcome::new(path, status));
        }

        let by_path: HashMap<&str, &Document> =
            documents.iter().map(|d| (d.path.as_str(), d)).collect();
        let mut pending: HashMap<String, PendingFile> = HashMap::new();
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut to_embed: Vec<Chunk> = Vec::new();

        for path in changes.changed() {
            let Some(doc) = by_path.get(path.as_str()) else {
                continue;
            };
            let chunks = self.chunker.chunk(doc);
            if chunks.is_empty() {
                let status = self.commit(&path, &doc.fingerprint, Vec::new(), &cancel).await;
                outcomes.push(FileOutcome::new(path, status));
                continue;
            }
            // a chunk over the batch budget fails only its own file
            if let Err(e) = self.batcher.plan(&chunks) {
                outcomes.push(FileOutcome::new(&path, failed(&path, &e)));
                continue;
            }
            for chunk in &chunks {
                owners.insert(chunk.id.clone(), path.clone());
            }
            to_embed.extend(chunks.iter().cloned());
            pending.insert(
                path,
                PendingFile {
                    fingerprint: doc.fingerprint.clone(),
                    vectors: HashMap::with_capacity(chunks.len()),
                    chunks,
                    settled: None,
                },
            );
        }

        let mut chunks_embedded = 0;
        let mut round = self.batcher.plan(&to_embed)?;
        if !round.is_empty() {
            tracing::info!(
                chunks = to_embed.len(),
                batches = round.len(),
                files = pending.len(),
                "embedding changed files"
            );
        }
        // A failed batch mixing several files is retried once per file, so a
        // bad chunk fails only the file it belongs to.
        let mut split = false;
        while !round.is_empty() {
            let mut retry: Vec<String> = Vec::new();
            let mut results = std::pin::pin!(self.batcher.embed_batches(round, cancel.clone()));
            while let Some(result) = results.next().await {
                let ids = result.batch.chunk_ids;
                match result.outcome {
                    BatchOutcome::Embedded(vectors) => {
                        chunks_embedded += vectors.len();
                        let mut touched = Vec::new();
                        for (id, vector) in ids.into_iter().zip(vectors) {
                            if let Some(path) = owners.get(&id)
                                && let Some(file) = pending.get_mut(path)
                            {
                                file.vectors.insert(id, vector);
                                touched.push(path.clone());
                            }
                        }
                        touched.dedup();
                        for path in touched {
                            let Some(file) = pending.get_mut(&path).filter(|f| f.is_complete())
                            else {
                                continue;
                            };
                            let chunks = std::mem::take(&mut file.chunks);
                            let embedded = attach_vectors(chunks, &mut file.vectors);
                            let fingerprint = file.fingerprint.clone();
                            let status = self.commit(&path, &fingerprint, embedded, &cancel).await;
                            if let Some(file) = pending.get_mut(&path) {
                                file.settled = Some(status);
                            }
                        }
                    }
                    BatchOutcome::Failed { error, .. }
                        if !split
                            && !error.affects_every_call()
                            && owner_count(&owners, &ids) > 1 =>
                    {
                        tracing::warn!(
                            batch = result.batch.index,
                            "batch spanning several files failed, retrying per file: {error}"
                        );
                        retry.extend(ids);
                    }
                    BatchOutcome::Failed { error, .. } => {
                        let reason = error.to_string();
                        settle(&mut pending, &owners, &ids, || FileStatus::Failed {
                            reason: reason.clone(),
                        });
                    }
                    BatchOutcome::Aborted(error) => {
                        let reason = format!("embedding aborted: {error}");
                        settle(&mut pending, &owners, &ids, || FileStatus::Failed {
                            reason: reason.clone(),
                        });
                    }
                    BatchOutcome::Cancelled => {
                        settle(&mut pending, &owners, &ids, || FileStatus::Cancelled);
                    }
                }
            }
            round = self.per_file_batches(&retry, &owners, &pending)?;
            split = true;
        }

        for (path, file) in pending {
            let status = file.settled.unwrap_or(FileStatus::Cancelled);
            if let FileStatus::Failed { reason } = &status {
                tracing::warn!(file = %path, "indexing failed: {reason}");
            }
            outcomes.push(FileOutcome::new(path, status));
        }
        outcomes.sort_by(|a, b| a.path.cmp(&b.path));

        let report = PassReport {
            outcomes,
            embed_calls: self.batcher.calls() - calls_before,
            chunks_embedded,
            duration_ms: start.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
        };
        tracing::info!(
            embed_calls = report.embed_calls,
            chunks = report.chunks_embedded,
            failed = report.failed().count(),
            duration_ms = report.duration_ms,
            "indexing pass finished"
        );
        Ok(report)
    }

    /// Re-plan `ids` so that no batch holds chunks of two files. Files that
    /// already settled are left out.
    fn per_file_batches(
        &self,
        ids: &[String],
        owners: &HashMap<String, String>,
        pending: &HashMap<String, PendingFile>,
    ) -> Result<Vec<Batch>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut files: Vec<&String> = ids.iter().filter_map(|id| owners.get(id)).collect();
        files.sort();
        files.dedup();

        let mut batches = Vec::new();
        for path in files {
            let Some(file) = pending.get(path).filter(|f| f.settled.is_none()) else {
                continue;
            };
            let chunks: Vec<Chunk> = file
                .chunks
                .iter()
                .filter(|c| wanted.contains(c.id.as_str()))
                .cloned()
                .collect();
            batches.extend(self.batcher.plan(&chunks)?);
        }
        for (index, batch) in batches.iter_mut().enumerate() {
            batch.index = index;
        }
        Ok(batches)
    }

    /// Cancellation is honoured here, before the upsert starts, never inside it.
    async fn commit(
        &self,
        path: &str,
        fingerprint: &str,
        chunks: Vec<EmbeddedChunk>,
        cancel: &CancellationToken,
    ) -> FileStatus {
        if cancel.is_cancelled() {
            return FileStatus::Cancelled;
        }
        match self.store.upsert_file(path, fingerprint, chunks).await {
            Ok(record) => {
                tracing::info!(file = %path, chunks = record.chunk_ids.len(), "indexed");
                FileStatus::Indexed {
                    chunks: record.chunk_ids.len(),
                }
            }
            Err(e) => failed(path, &e),
        }
    }
}

fn failed(path: &str, error: &IndexError) -> FileStatus {
    tracing::debug!(file = %path, "file failed: {error}");
    FileStatus::Failed {
        reason: error.to_string(),
    }
}

fn attach_vectors(
    chunks: Vec<Chunk>,
    vectors: &mut HashMap<String, Vec<f32>>,
) -> Vec<EmbeddedChunk> {
    chunks
        .into_iter()
        .filter_map(|chunk| {
            let vector = vectors.remove(&chunk.id)?;
            Some(EmbeddedChunk { chunk, vector })
        })
        .collect()
}

fn owner_count(owners: &HashMap<String, String>, ids: &[String]) -> usize {
    ids.iter()
        .filter_map(|id| owners.get(id))
        .collect::<HashSet<_>>()
        .len()
}

/// Mark every unsettled file owning one of `ids`. The first reason wins.
fn settle(
    pending: &mut HashMap<String, PendingFile>,
    owners: &HashMap<String, String>,
    ids: &[String],
    status: impl Fn() -> FileStatus,
) {
    for id in ids {
        if let Some(file) = owners.get(id).and_then(|p| pending.get_mut(p))
            && file.settled.is_none()
        {
            file.settled = Some(status());
            file.vectors.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use trove_llm::EmbedError;
    use trove_llm::mock::MockEmbedder;
    use trove_memory::{InMemoryVectorStore, SqliteStore};

    use super::*;
    use crate::batcher::BatcherConfig;
    use crate::chunker::ChunkerConfig;
    use crate::retry::RetryPolicy;
    use crate::tokens::WhitespaceTokenCounter;

    const MODEL: &str = "mock-embed";

    async fn indexer(mock: MockEmbedder, batcher: BatcherConfig) -> Indexer<MockEmbedder> {
        let sqlite = SqliteStore::new(":memory:").await.unwrap();
        let store = IndexStore::open(Arc::new(InMemoryVectorStore::new()), sqlite, MODEL)
            .await
            .unwrap();
        let chunker = Chunker::new(
            ChunkerConfig {
                min_tokens: 2,
                max_tokens: 8,
            },
            Arc::new(WhitespaceTokenCounter),
        )
        .unwrap();
        let batcher = EmbeddingBatcher::new(Arc::new(mock), batcher).unwrap();
        Indexer::new(Arc::new(store), chunker, batcher).unwrap()
    }

    fn quick() -> BatcherConfig {
        BatcherConfig {
            max_items: 2,
            batch_delay: Duration::from_millis(1),
            retry: RetryPolicy {
                max_retries: 1,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            ..BatcherConfig::default()
        }
    }

    fn doc(path: &str, text: &str) -> Document {
        Document::new(path, text.as_bytes().to_vec())
    }

    fn status_of<'a>(report: &'a PassReport, path: &str) -> &'a FileStatus {
        &report
            .outcomes
            .iter()
            .find(|o| o.path == path)
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn rejects_model_mismatch() {
        let sqlite = SqliteStore::new(":memory:").await.unwrap();
        let store = IndexStore::open(Arc::new(InMemoryVectorStore::new()), sqlite, "other")
            .await
            .unwrap();
        let chunker =
            Chunker::new(ChunkerConfig::default(), Arc::new(WhitespaceTokenCounter)).unwrap();
        let batcher = EmbeddingBatcher::new(
            Arc::new(MockEmbedder::new(4).with_model(MODEL)),
            BatcherConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            Indexer::new(Arc::new(store), chunker, batcher),
            Err(IndexError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_paths_abort_pass() {
        let ix = indexer(MockEmbedder::new(8).with_model(MODEL), quick()).await;
        let err = ix
            .run_pass(vec![doc("a.md", "x"), doc("a.md", "y")], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));
    }

    #[tokio::test]
    async fn indexes_then_second_pass_is_noop() {
        let mock = MockEmbedder::new(8).with_model(MODEL);
        let ix = indexer(mock.clone(), quick()).await;
        let docs = || {
            vec![
                doc("a.md", "alpha beta gamma\n\ndelta epsilon"),
                doc("b.md", "one two three four"),
            ]
        };

        let first = ix.run_pass(docs(), CancellationToken::new()).await.unwrap();
        assert!(first.succeeded());
        assert!(first.embed_calls > 0);
        assert!(matches!(status_of(&first, "a.md"), FileStatus::Indexed { .. }));

        let calls = mock.calls();
        let second = ix.run_pass(docs(), CancellationToken::new()).await.unwrap();
        assert_eq!(second.embed_calls, 0);
        assert_eq!(mock.calls(), calls);
        assert_eq!(second.count(|s| *s == FileStatus::Unchanged), 2);
    }

    #[tokio::test]
    async fn deleted_files_are_removed() {
        let ix = indexer(MockEmbedder::new(8).with_model(MODEL), quick()).await;
        ix.run_pass(vec![doc("a.md", "a b c"), doc("b.md", "d e f")], CancellationToken::new())
            .await
            .unwrap();

        let report = ix
            .run_pass(vec![doc("a.md", "a b c")], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status_of(&report, "b.md"), &FileStatus::Deleted);
        assert!(ix.store().get_record("b.md").await.unwrap().is_none());
        assert!(ix.store().verify_consistency().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn empty_file_is_recorded() {
        let ix = indexer(MockEmbedder::new(8).with_model(MODEL), quick()).await;
        let report = ix
            .run_pass(vec![doc("empty.md", "")], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status_of(&report, "empty.md"), &FileStatus::Indexed { chunks: 0 });
        assert_eq!(report.embed_calls, 0);

        let again = ix
            .run_pass(vec![doc("empty.md", "")], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status_of(&again, "empty.md"), &FileStatus::Unchanged);
    }

    #[tokio::test]
    async fn fatal_failure_isolated_to_files() {
        let mock = MockEmbedder::new(8).with_model(MODEL).failing_on("poison");
        let config = BatcherConfig {
            max_items: 1,
            concurrency: 1,
            ..quick()
        };
        let ix = indexer(mock, config).await;
        let report = ix
            .run_pass(
                vec![doc("a.md", "clean words"), doc("b.md", "poison words")],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(status_of(&report, "a.md"), FileStatus::Indexed { chunks: 1 }));
        assert!(matches!(status_of(&report, "b.md"), FileStatus::Failed { .. }));
        assert!(!report.succeeded());
        assert!(ix.store().get_record("b.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_input_does_not_stop_later_files() {
        let mock = MockEmbedder::new(8).with_model(MODEL).failing_on("poison");
        let config = BatcherConfig {
            max_items: 1,
            concurrency: 1,
            ..quick()
        };
        let ix = indexer(mock, config).await;
        let report = ix
            .run_pass(
                vec![doc("a.md", "poison words"), doc("b.md", "clean words")],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(
            status_of(&report, "a.md"),
            FileStatus::Failed { reason } if reason.contains("invalid input")
        ));
        assert_eq!(status_of(&report, "b.md"), &FileStatus::Indexed { chunks: 1 });
    }

    #[tokio::test]
    async fn failed_batch_of_several_files_is_retried_per_file() {
        let mock = MockEmbedder::new(8).with_model(MODEL).failing_on("poison");
        let ix = indexer(mock.clone(), quick()).await;
        let report = ix
            .run_pass(
                vec![doc("a.md", "poison words"), doc("b.md", "clean words")],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(status_of(&report, "a.md"), FileStatus::Failed { .. }));
        assert_eq!(status_of(&report, "b.md"), &FileStatus::Indexed { chunks: 1 });
        assert_eq!(report.embed_calls, 3);
        assert_eq!(mock.batches().last().map(Vec::len), Some(1));
        assert!(ix.store().verify_consistency().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn rejected_credentials_abort_remaining_files() {
        let mock = MockEmbedder::new(8)
            .with_model(MODEL)
            .with_script(vec![Some(EmbedError::Authentication("bad key".into()))]);
        let config = BatcherConfig {
            max_items: 1,
            concurrency: 1,
            ..quick()
        };
        let ix = indexer(mock.clone(), config).await;
        let report = ix
            .run_pass(
                vec![doc("a.md", "first file"), doc("b.md", "second file")],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(status_of(&report, "a.md"), FileStatus::Failed { .. }));
        assert!(matches!(
            status_of(&report, "b.md"),
            FileStatus::Failed { reason } if reason.starts_with("embedding aborted")
        ));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn transient_exhaustion_fails_file_and_keeps_previous_version() {
        let mock = MockEmbedder::new(8).with_model(MODEL);
        let ix = indexer(mock.clone(), quick()).await;
        ix.run_pass(vec![doc("a.md", "first version")], CancellationToken::new())
            .await
            .unwrap();
        let before = ix.store().get_record("a.md").await.unwrap().unwrap();

        mock.reset();
        let _scripted = mock.with_script(vec![
            Some(EmbedError::transient("busy")),
            Some(EmbedError::transient("busy")),
        ]);
        let report = ix
            .run_pass(vec![doc("a.md", "second version")], CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(status_of(&report, "a.md"), FileStatus::Failed { .. }));
        let after = ix.store().get_record("a.md").await.unwrap().unwrap();
        assert_eq!(after.fingerprint, before.fingerprint);
    }

    #[tokio::test]
    async fn cancelled_pass_commits_nothing() {
        let ix = indexer(MockEmbedder::new(8).with_model(MODEL), quick()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = ix
            .run_pass(vec![doc("a.md", "words here")], cancel)
            .await
            .unwrap();
        assert_eq!(status_of(&report, "a.md"), &FileStatus::Cancelled);
        assert!(ix.store().records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_chunk_fails_only_its_file() {
        let config = BatcherConfig {
            max_tokens_per_batch: 3,
            ..quick()
        };
        let ix = indexer(MockEmbedder::new(8).with_model(MODEL), config).await;
        let report = ix
            .run_pass(
                vec![doc("big.md", "one two three four five"), doc("small.md", "tiny")],
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(
            status_of(&report, "big.md"),
            FileStatus::Failed { reason } if reason.contains("batch limit")
        ));
        assert!(matches!(status_of(&report, "small.md"), FileStatus::Indexed { chunks: 1 }));
    }
}
