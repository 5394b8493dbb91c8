//! Turns chunks into provider-sized batches and embeds them with pacing,
//! bounded concurrency and retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use trove_llm::{EmbedError, EmbeddingProvider};

use crate::chunker::Chunk;
use crate::error::{IndexError, Result};
use crate::retry::{self, Attempt, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    pub max_items: usize,
    pub max_tokens_per_batch: usize,
    /// Minimum spacing between consecutive batch starts.
    pub batch_delay: Duration,
    /// Batches in flight at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_items: 96,
            max_tokens_per_batch: 16_384,
            batch_delay: Duration::from_secs(3),
            concurrency: 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl BatcherConfig {
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] when a limit or the batch delay
    /// is zero, or the backoff bounds are inverted.
    pub fn validate(&self) -> Result<()> {
        if self.max_items == 0 {
            return Err(IndexError::Configuration(
                "embed_max_items_per_batch must be positive".into(),
            ));
        }
        if self.max_tokens_per_batch == 0 {
            return Err(IndexError::Configuration(
                "embed_max_tokens_per_batch must be positive".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(IndexError::Configuration(
                "embed_concurrency must be positive".into(),
            ));
        }
        if self.batch_delay.is_zero() {
            return Err(IndexError::Configuration(
                "embed_batch_delay must be positive".into(),
            ));
        }
        if self.retry.base_backoff > self.retry.max_backoff {
            return Err(IndexError::Configuration(
                "base backoff exceeds max backoff".into(),
            ));
        }
        Ok(())
    }
}

/// Chunks sent to the provider in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub chunk_ids: Vec<String>,
    pub texts: Vec<String>,
    pub tokens: usize,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// One vector per chunk id, in batch order.
    Embedded(Vec<Vec<f32>>),
    /// Fatal error, or a transient one that outlived the retries.
    Failed { error: EmbedError, fatal: bool },
    /// Never sent: an earlier batch failed in a way every call would.
    Aborted(EmbedError),
    /// Never sent: the pass was cancelled.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch: Batch,
    pub outcome: BatchOutcome,
    /// Provider calls made for this batch, retries included.
    pub attempts: u32,
}

/// Error of [`EmbeddingBatcher::embed_all`].
#[derive(Debug, thiserror::Error)]
#[error("embedding failed for {} chunk(s): {error}", .chunk_ids.len())]
pub struct BatchFailure {
    /// Ids without a vector: failed, aborted or cancelled.
    pub chunk_ids: Vec<String>,
    pub error: IndexError,
    /// Vectors of batches that completed before or despite the failure.
    pub completed: HashMap<String, Vec<f32>>,
}

/// Enforces a minimum delay between consecutive batch starts. The first
/// start is never delayed.
#[derive(Debug)]
struct Pacer {
    delay: Duration,
    last_start: tokio::sync::Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_start: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns `false` if cancelled while waiting.
    async fn wait(&self, cancel: &CancellationToken) -> bool {
        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last
            && !self.delay.is_zero()
        {
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep_until(prev + self.delay) => {}
            }
        }
        *last = Some(Instant::now());
        true
    }
}

/// Shared state of one `embed_batches` run.
struct RunState {
    pacer: Pacer,
    abort: Mutex<Option<EmbedError>>,
    dimension: OnceLock<usize>,
}

impl RunState {
    fn aborted(&self) -> Option<EmbedError> {
        self.abort.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_abort(&self, error: &EmbedError) {
        if let Ok(mut guard) = self.abort.lock()
            && guard.is_none()
        {
            *guard = Some(error.clone());
        }
    }
}

#[derive(Debug)]
pub struct EmbeddingBatcher<P> {
    provider: Arc<P>,
    config: BatcherConfig,
    calls: AtomicUsize,
}

impl<P: EmbeddingProvider + 'static> EmbeddingBatcher<P> {
    /// # Errors
    ///
    /// Returns [`IndexError::Configuration`] for invalid limits.
    pub fn new(provider: Arc<P>, config: BatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            provider,
            config,
            calls: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Provider calls made by this batcher since construction.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Greedy split in input order under both ceilings.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ChunkTooLarge`] for a chunk that cannot fit in any
    /// batch.
    pub fn plan(&self, chunks: &[Chunk]) -> Result<Vec<Batch>> {
        let limit = self.config.max_tokens_per_batch;
        if let Some(big) = chunks.iter().find(|c| c.token_count > limit) {
            return Err(IndexError::ChunkTooLarge {
                chunk_id: big.id.clone(),
                tokens: big.token_count,
                limit,
            });
        }

        let mut batches: Vec<Batch> = Vec::new();
        let mut current = Batch {
            index: 0,
            chunk_ids: Vec::new(),
            texts: Vec::new(),
            tokens: 0,
        };
        for chunk in chunks {
            let over_items = current.len() + 1 > self.config.max_items;
            let over_tokens = current.tokens + chunk.token_count > limit;
            if !current.is_empty() && (over_items || over_tokens) {
                let index = current.index + 1;
                batches.push(std::mem::replace(
                    &mut current,
                    Batch {
                        index,
                        chunk_ids: Vec::new(),
                        texts: Vec::new(),
                        tokens: 0,
                    },
                ));
            }
            current.chunk_ids.push(chunk.id.clone());
            current.texts.push(chunk.text.clone());
            current.tokens += chunk.token_count;
        }
        if !current.is_empty() {
            batches.push(current);
        }
        Ok(batches)
    }

    /// Embed batches with up to `concurrency` in flight. Yields exactly one
    /// result per batch, in completion order.
    ///
    /// A fatal failure fails only its batch, unless every call would fail the
    /// same way (authentication): then no further batch is sent and the rest
    /// come back as [`BatchOutcome::Aborted`]. Cancellation has the same effect
    /// with [`BatchOutcome::Cancelled`].
    pub fn embed_batches(
        &self,
        batches: Vec<Batch>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = BatchResult> + '_ {
        let state = Arc::new(RunState {
            pacer: Pacer::new(self.config.batch_delay),
            abort: Mutex::new(None),
            dimension: OnceLock::new(),
        });
        futures::stream::iter(batches)
            .map(move |batch| {
                let state = Arc::clone(&state);
                let cancel = cancel.clone();
                async move { self.embed_one(batch, &state, &cancel).await }
            })
            .buffer_unordered(self.config.concurrency)
    }

    async fn embed_one(
        &self,
        batch: Batch,
        state: &RunState,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let skipped = |batch: Batch, outcome: BatchOutcome| BatchResult {
            batch,
            outcome,
            attempts: 0,
        };

        if let Some(e) = state.aborted() {
            return skipped(batch, BatchOutcome::Aborted(e));
        }
        if cancel.is_cancelled() || !state.pacer.wait(cancel).await {
            return skipped(batch, BatchOutcome::Cancelled);
        }
        if let Some(e) = state.aborted() {
            return skipped(batch, BatchOutcome::Aborted(e));
        }

        let label = format!("batch {}", batch.index);
        tracing::debug!(batch = batch.index, items = batch.len(), tokens = batch.tokens, "embedding batch");
        let (texts, expected, dimension) = (&batch.texts, batch.len(), &state.dimension);
        let retried = retry::run(&self.config.retry, cancel, &label, move |_| async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.provider.embed_batch(texts).await {
                Ok(vectors) => match check_vectors(&vectors, expected, dimension) {
                    Ok(()) => Attempt::Done(vectors),
                    Err(e) => Attempt::Fatal(e),
                },
                Err(e) => Attempt::from(Err::<Vec<Vec<f32>>, _>(e)),
            }
        })
        .await;

        let outcome = match retried.result {
            Ok(vectors) => BatchOutcome::Embedded(vectors),
            Err(error) => {
                if retried.fatal && error.affects_every_call() {
                    state.set_abort(&error);
                }
                BatchOutcome::Failed {
                    error,
                    fatal: retried.fatal,
                }
            }
        };
        BatchResult {
            batch,
            outcome,
            attempts: retried.attempts,
        }
    }

    /// Embed every chunk or report which ids have no vector.
    ///
    /// # Errors
    ///
    /// Returns [`BatchFailure`] with the vectors that did complete.
    pub async fn embed_all(
        &self,
        chunks: &[Chunk],
    ) -> std::result::Result<HashMap<String, Vec<f32>>, BatchFailure> {
        self.embed_all_cancellable(chunks, CancellationToken::new())
            .await
    }

    /// [`Self::embed_all`] that stops issuing batches once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`BatchFailure`] with the vectors that did complete; its error
    /// is [`IndexError::Cancelled`] when nothing failed but the run was cut short.
    pub async fn embed_all_cancellable(
        &self,
        chunks: &[Chunk],
        cancel: CancellationToken,
    ) -> std::result::Result<HashMap<String, Vec<f32>>, BatchFailure> {
        let batches = self.plan(chunks).map_err(|error| BatchFailure {
            chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
            error,
            completed: HashMap::new(),
        })?;

        let mut completed = HashMap::with_capacity(chunks.len());
        let mut missing = Vec::new();
        let mut first_error: Option<(bool, EmbedError)> = None;

        let mut results = std::pin::pin!(self.embed_batches(batches, cancel));
        while let Some(result) = results.next().await {
            match result.outcome {
                BatchOutcome::Embedded(vectors) => {
                    completed.extend(result.batch.chunk_ids.into_iter().zip(vectors));
                }
                BatchOutcome::Failed { error, fatal } => {
                    // keep the fatal error over a transient one
                    if first_error.as_ref().is_none_or(|(was_fatal, _)| fatal && !was_fatal) {
                        first_error = Some((fatal, error));
                    }
                    missing.extend(result.batch.chunk_ids);
                }
                BatchOutcome::Aborted(_) | BatchOutcome::Cancelled => {
                    missing.extend(result.batch.chunk_ids);
                }
            }
        }

        match first_error {
            None if missing.is_empty() => Ok(completed),
            None => Err(BatchFailure {
                chunk_ids: missing,
                error: IndexError::Cancelled,
                completed,
            }),
            Some((_, error)) => Err(BatchFailure {
                chunk_ids: missing,
                error: IndexError::Embedding(error),
                completed,
            }),
        }
    }
}

/// Vector count must match the batch and every vector must share the
/// dimension of the first one seen in this run.
fn check_vectors(
    vectors: &[Vec<f32>],
    expected: usize,
    dimension: &OnceLock<usize>,
) -> std::result::Result<(), EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::MalformedResponse(format!(
            "expected {expected} vectors, got {}",
            vectors.len()
        )));
    }
    for v in vectors {
        if v.is_empty() {
            return Err(EmbedError::MalformedResponse("empty vector".into()));
        }
        let dim = *dimension.get_or_init(|| v.len());
        if v.len() != dim {
            return Err(EmbedError::MalformedResponse(format!(
                "vector dimension {} differs from {dim}",
                v.len()
            )));
        }
    }
    Ok(())
}
