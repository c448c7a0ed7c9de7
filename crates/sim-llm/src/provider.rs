use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sim_core::{Result, SimError};
use tracing::warn;

/// A single-prompt request to a chat-completion service.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// System prompt, sent ahead of the user prompt when present.
    pub system: Option<String>,
    pub prompt: String,
    /// Ask the service to answer with a JSON object.
    pub json: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            json: false,
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Request a JSON object response.
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub usage: Usage,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Trait implemented by each chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Human-readable name, e.g. "openai", "mock".
    fn name(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Send `request` as a JSON request and deserialize the answer.
///
/// Models sometimes wrap JSON in a Markdown code fence even when asked not
/// to; the fence is stripped before parsing.
pub async fn complete_json<T: DeserializeOwned>(
    provider: &dyn ChatProvider,
    request: &ChatRequest,
) -> Result<T> {
    let mut request = request.clone();
    request.json = true;
    let response = provider.chat(&request).await?;
    let body = strip_code_fence(&response.text);
    serde_json::from_str(body).map_err(|e| {
        warn!(provider = provider.name(), error = %e, "response is not the expected JSON");
        SimError::MalformedResponse(format!("{e}: {body}"))
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Bounds every request of the wrapped provider by a wall-clock timeout.
pub struct TimeoutChat<P> {
    inner: P,
    timeout: Duration,
}

impl<P: ChatProvider> TimeoutChat<P> {
    /// A zero timeout disables the bound.
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<P: ChatProvider> ChatProvider for TimeoutChat<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        if self.timeout.is_zero() {
            return self.inner.chat(request).await;
        }
        tokio::time::timeout(self.timeout, self.inner.chat(request))
            .await
            .map_err(|_| SimError::Timeout(self.timeout.as_secs()))?
    }
}
