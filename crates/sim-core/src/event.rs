use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

/// Events flowing out of the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimEvent {
    // ── Tick lifecycle ─────────────────────────────────────────
    TickStarted {
        tick: u64,
        moment: String,
        sim_time: NaiveDateTime,
    },
    TickCompleted {
        tick: u64,
        moment: String,
        sim_time: NaiveDateTime,
        groups: usize,
    },
    TickFailed {
        tick: u64,
        error: String,
    },

    // ── Agent lifecycle ────────────────────────────────────────
    AgentFailed {
        agent: String,
        moment: String,
        error: String,
        retry: bool,
    },
    AgentReflected {
        agent: String,
    },

    // ── Conversation lifecycle ─────────────────────────────────
    ConversationStarted {
        conversation_id: Uuid,
        instigator: String,
        target: String,
    },
    ConversationTurn {
        conversation_id: Uuid,
        speaker: String,
    },
    ConversationEnded {
        conversation_id: Uuid,
        turns: u32,
    },
    ConversationEvicted {
        conversation_id: Uuid,
        failures: u32,
    },

    // ── System ─────────────────────────────────────────────────
    Shutdown,
}

/// A broadcast-based event bus for simulation-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<SimEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: SimEvent) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
