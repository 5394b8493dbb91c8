use std::future::Future;
use std::sync::Arc;

use crate::error::EmbedError;

/// Narrow embedding capability: an ordered batch of strings in, one vector per
/// string out, in the same order.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of documents.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Transient`] for failures worth retrying, and the
    /// other variants for failures that must not be retried.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbedError>> + Send;

    /// Embed a search query. Providers that distinguish query and document
    /// embeddings override this.
    ///
    /// # Errors
    ///
    /// Same as [`EmbeddingProvider::embed_batch`].
    fn embed_query(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbedError>> + Send {
        let texts = vec![text.to_owned()];
        async move {
            let mut vectors = self.embed_batch(&texts).await?;
            if vectors.len() != 1 {
                return Err(EmbedError::MalformedResponse(format!(
                    "expected 1 vector for query, got {}",
                    vectors.len()
                )));
            }
            vectors
                .pop()
                .ok_or_else(|| EmbedError::MalformedResponse("empty query response".into()))
        }
    }

    /// Model identifier recorded alongside stored vectors.
    fn model(&self) -> &str;
}

impl<P: EmbeddingProvider> EmbeddingProvider for Arc<P> {
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbedError>> + Send {
        (**self).embed_batch(texts)
    }

    fn embed_query(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbedError>> + Send {
        (**self).embed_query(text)
    }

    fn model(&self) -> &str {
        (**self).model()
    }
}
