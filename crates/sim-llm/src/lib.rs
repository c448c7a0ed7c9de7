//! # sim-llm
//!
//! The external collaborators every agent leans on: a chat-completion service
//! that answers free-form or JSON prompts, and an embedding service that turns
//! text into vectors for memory retrieval. Both are traits so the simulation can
//! run against OpenAI-compatible endpoints or the deterministic mocks in [`mock`].

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod provider;

pub use embedding::{EmbeddingProvider, OpenAiEmbedding, check_batch};
pub use mock::{MockChat, MockEmbedding};
pub use openai::OpenAiChat;
pub use provider::{ChatProvider, ChatRequest, ChatResponse, TimeoutChat, Usage, complete_json};
