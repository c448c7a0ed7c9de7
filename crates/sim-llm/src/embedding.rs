//! Text embeddings for memory retrieval.
//!
//! Every vector an agent stores or queries with goes through
//! [`EmbeddingProvider::embed`], which holds providers to their contract: one
//! vector per input text, each exactly [`EmbeddingProvider::dimensions`] wide.
//! Memories embedded at different widths could not be compared, so a provider
//! answering at the wrong width fails loudly instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sim_core::{Result, SimError};
use tracing::debug;

use crate::openai::OPENAI_BASE_URL;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Raw provider call. Callers go through [`EmbeddingProvider::embed`].
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Width of every vector this provider produces.
    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;

    /// Embed `texts`, one vector per text in input order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.embed_batch(texts).await?;
        check_batch(self.name(), texts.len(), self.dimensions(), vectors)
    }
}

/// Reject a batch with a missing vector or a vector of the wrong width.
pub fn check_batch(
    provider: &str,
    expected: usize,
    dims: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(SimError::Embedding(format!(
            "{provider} returned {} vectors for {expected} texts",
            vectors.len()
        )));
    }
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
        return Err(SimError::Embedding(format!(
            "{provider} vector {i} has {} dimensions, expected {dims}",
            v.len()
        )));
    }
    Ok(vectors)
}

#[derive(Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsReply {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// `/embeddings` on an OpenAI-compatible endpoint.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedding {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: OPENAI_BASE_URL.into(),
            model: "text-embedding-3-small".into(),
            dims: 1536,
        }
    }

    /// Memories are only comparable at one width, so `dims` is enforced on
    /// every reply.
    pub fn with_model(mut self, model: impl Into<String>, dims: usize) -> Self {
        self.model = model.into();
        self.dims = dims;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// The text-embedding-3 family can shorten its vectors on request.
    fn requested_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dims)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!(model = %self.model, count = texts.len(), dims = self.dims, "embedding");

        let body = EmbeddingsBody {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions(),
        };
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| SimError::Embedding(format!("request to {} failed: {e}", self.base_url)))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SimError::Embedding(format!("HTTP {status}: {text}")));
        }

        let mut reply: EmbeddingsReply = resp
            .json()
            .await
            .map_err(|e| SimError::Embedding(format!("unreadable reply: {e}")))?;
        reply.data.sort_by_key(|item| item.index);
        Ok(reply.data.into_iter().map(|item| item.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "openai"
    }
}
