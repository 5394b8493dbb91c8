//! Test-only deterministic embedding provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::EmbedError;
use crate::provider::EmbeddingProvider;

/// Hashes lowercase words into a fixed-size normalized vector, so texts sharing
/// vocabulary score higher against each other. Identical text always yields an
/// identical vector.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    pub model: String,
    /// Milliseconds to sleep inside every call.
    pub delay_ms: u64,
    /// Any batch containing a text with this substring fails with `InvalidInput`.
    pub fail_on: Option<String>,
    calls: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<Vec<String>>>>,
    script: Arc<Mutex<VecDeque<Option<EmbedError>>>>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: "mock-embed".into(),
            delay_ms: 0,
            fail_on: None,
            calls: Arc::new(AtomicUsize::new(0)),
            batches: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_on = Some(marker.into());
        self
    }

    /// Queue outcomes for the next calls: `Some(err)` fails that call, `None`
    /// lets it succeed. Calls past the end of the script succeed.
    #[must_use]
    pub fn with_script(self, outcomes: Vec<Option<EmbedError>>) -> Self {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).extend(outcomes);
        self
    }

    /// Number of `embed_batch`/`embed_query` calls made, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts of every call, in call order.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn embedded_texts(&self) -> Vec<String> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// The vector this mock returns for `text`.
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.max(1);
        let mut v = vec![0.0f32; dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let h = fnv1a(&word.to_lowercase());
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h % dim as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v[0] = 1.0;
        } else {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl EmbeddingProvider for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).push(texts.to_vec());
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let scripted = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front().flatten();
        if let Some(err) = scripted {
            return Err(err);
        }
        if let Some(marker) = &self.fail_on
            && texts.iter().any(|t| t.contains(marker.as_str()))
        {
            return Err(EmbedError::InvalidInput(format!("rejected input containing {marker:?}")));
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
