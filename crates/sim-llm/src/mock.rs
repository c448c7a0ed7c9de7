//! Mock collaborators for deterministic testing.
//!
//! Return pre-configured responses without making any HTTP calls.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sim_core::{Result, SimError};

use crate::embedding::EmbeddingProvider;
use crate::provider::*;

const EXHAUSTED: &str = "(mock: no more queued responses)";

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Error(String),
}

/// A mock chat provider that returns pre-configured responses.
///
/// Rules registered with [`MockChat::with_reply_when`] are checked first, in
/// registration order, against the prompt. Otherwise queued replies are
/// consumed in FIFO order, then the fallback is returned.
///
/// # Example
/// ```
/// use sim_llm::MockChat;
/// let chat = MockChat::new()
///     .with_response("Hello, world!")
///     .with_reply_when("importance", "{\"importance\": 3}");
/// ```
pub struct MockChat {
    queue: Mutex<VecDeque<Reply>>,
    rules: Mutex<Vec<(String, Reply)>>,
    fallback: Mutex<String>,
    /// Track all requests received (for assertions in tests).
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            rules: Mutex::new(Vec::new()),
            fallback: Mutex::new(EXHAUSTED.to_string()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a text response.
    pub fn with_response(self, text: &str) -> Self {
        self.queue.lock().push_back(Reply::Text(text.to_string()));
        self
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.queue.lock().push_back(Reply::Error(error.to_string()));
        self
    }

    /// Answer every prompt containing `needle` with `text`.
    pub fn with_reply_when(self, needle: &str, text: &str) -> Self {
        self.rules
            .lock()
            .push((needle.to_string(), Reply::Text(text.to_string())));
        self
    }

    /// Fail every prompt containing `needle`.
    pub fn with_error_when(self, needle: &str, error: &str) -> Self {
        self.rules
            .lock()
            .push((needle.to_string(), Reply::Error(error.to_string())));
        self
    }

    /// Response returned once the queue is empty.
    pub fn with_fallback(self, text: &str) -> Self {
        *self.fallback.lock() = text.to_string();
        self
    }

    /// Queue a response on a shared provider.
    pub fn queue_response(&self, text: &str) {
        self.queue.lock().push_back(Reply::Text(text.to_string()));
    }

    /// Get all requests that were made to this provider.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests whose prompt contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.prompt.contains(needle))
            .count()
    }

    fn next_reply(&self, prompt: &str) -> Reply {
        if let Some((_, reply)) = self
            .rules
            .lock()
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
        {
            return reply.clone();
        }
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Reply::Text(self.fallback.lock().clone()))
    }
}

#[async_trait]
impl ChatProvider for MockChat {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(request.clone());
        match self.next_reply(&request.prompt) {
            Reply::Text(text) => Ok(ChatResponse {
                usage: Usage {
                    input_tokens: request.prompt.len() as u32 / 4,
                    output_tokens: text.len() as u32 / 4,
                },
                text,
            }),
            Reply::Error(error) => Err(SimError::Llm(error)),
        }
    }
}

/// Deterministic embeddings: every text maps to a unit vector derived from a
/// hash of its bytes, so equal texts always embed identically.
pub struct MockEmbedding {
    dims: usize,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent `embed` call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `embed` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector [`EmbeddingProvider::embed`] returns for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        // FNV-1a seeds a xorshift stream
        let mut state = text
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3))
            | 1;
        let raw: Vec<f32> = (0..self.dims)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state % 2001) as f32 / 1000.0 - 1.0
            })
            .collect();
        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            let mut unit = vec![0.0; self.dims];
            unit[0] = 1.0;
            return unit;
        }
        raw.into_iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SimError::Embedding("mock embedding failure".into()));
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }
}
