//! OpenAI-compatible `/embeddings` backend (OpenAI, Voyage, Ollama, vLLM, ...).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EmbedError;
use crate::http::{build_client, parse_retry_after};
use crate::provider::EmbeddingProvider;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    /// `(document, query)` values for the Voyage `input_type` field.
    input_types: Option<(String, String)>,
}

impl fmt::Debug for HttpEmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEmbeddingProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("input_types", &self.input_types)
            .finish()
    }
}

impl HttpEmbeddingProvider {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, EmbedError> {
        let client = build_client(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)?;
        Ok(Self::with_client(client, base_url, api_key, model))
    }

    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            input_types: None,
        }
    }

    /// Send `input_type` with every request, using `document` for indexing and
    /// `query` for search.
    #[must_use]
    pub fn with_input_types(mut self, document: impl Into<String>, query: impl Into<String>) -> Self {
        self.input_types = Some((document.into(), query.into()));
        self
    }

    async fn request(
        &self,
        texts: &[String],
        input_type: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            input_type,
        };

        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await?;

        if !status.is_success() {
            tracing::warn!(%status, model = %self.model, "embedding request failed");
            return Err(EmbedError::from_status(status, &text, retry_after));
        }

        let resp: EmbeddingResponse = serde_json::from_str(&text)?;
        let vectors = resp.into_ordered();
        if vectors.len() != texts.len() {
            return Err(EmbedError::MalformedResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        tracing::debug!(count = vectors.len(), model = %self.model, "embedded batch");
        Ok(vectors)
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let input_type = self.input_types.as_ref().map(|(doc, _)| doc.as_str());
        self.request(texts, input_type).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let input_type = self.input_types.as_ref().map(|(_, query)| query.as_str());
        let mut vectors = self.request(&[text.to_owned()], input_type).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::MalformedResponse("empty query response".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingResponse {
    /// Vectors in input order. Servers may return `data` out of order and tag
    /// each entry with its input `index`.
    fn into_ordered(mut self) -> Vec<Vec<f32>> {
        if self.data.iter().all(|d| d.index.is_some()) {
            self.data.sort_by_key(|d| d.index);
        }
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}
