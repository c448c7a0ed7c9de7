//! # sim-memory
//!
//! Memory for simulated agents:
//!
//! - **Records**: immutable observations, reflections, and plans with an embedding.
//! - **Ranker**: scores memories against query embeddings by recency, importance, and relevance.
//! - **Streams**: per-agent storage with relevance and recency retrieval, in process or in SQLite.
//!
//! Times are whole simulated hours since the run started.

pub mod ranker;
pub mod record;
pub mod store;
pub mod stream;

pub use ranker::{MemoryRanker, Ranked, cosine_similarity};
pub use record::{MemoryKind, MemoryRecord};
pub use store::SqliteStore;
pub use stream::{InMemoryStream, MemoryStream};
