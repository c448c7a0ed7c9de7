use serde::{Deserialize, Serialize};

/// Category tag of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Observation,
    Reflection,
    Plan,
    Conversation,
}

impl MemoryKind {
    pub fn as_u8(self) -> u8 {
        match self {
            MemoryKind::Observation => 0,
            MemoryKind::Reflection => 1,
            MemoryKind::Plan => 2,
            MemoryKind::Conversation => 3,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MemoryKind::Observation),
            1 => Some(MemoryKind::Reflection),
            2 => Some(MemoryKind::Plan),
            3 => Some(MemoryKind::Conversation),
            _ => None,
        }
    }
}

/// A single memory. Only `last_access` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub agent: String,
    /// Simulated hours since run start at creation.
    pub created_at: i64,
    /// Simulated hours since run start at the last retrieval.
    pub last_access: i64,
    /// 0 (mundane) to 10 (poignant).
    pub importance: u8,
    pub kind: MemoryKind,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl MemoryRecord {
    pub const MAX_IMPORTANCE: u8 = 10;

    /// Create a memory at simulated hour `now`. Importance is clamped to 0..=10.
    pub fn new(
        agent: impl Into<String>,
        now: i64,
        importance: u8,
        kind: MemoryKind,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            agent: agent.into(),
            created_at: now,
            last_access: now,
            importance: importance.min(Self::MAX_IMPORTANCE),
            kind,
            text: text.into(),
            embedding,
        }
    }

    /// Record a retrieval at simulated hour `now`. Never moves backwards.
    pub fn touch(&mut self, now: i64) {
        self.last_access = self.last_access.max(now);
    }
}
