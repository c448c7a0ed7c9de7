use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::error::Result;
use crate::plan::Plan;

/// Shared handle to an agent. The engine never owns agent identity; it only
/// holds references handed to it by a factory.
pub type AgentRef = Arc<dyn SimAgent>;

/// The operations the engine dispatches to an agent, plus the handful of
/// accessors it reads and writes while doing so.
///
/// Every async operation may fail; the engine isolates failures per agent.
/// Implementations use interior mutability because the same agent is
/// reachable from the scheduler and the conversation loop at once.
#[async_trait]
pub trait SimAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Name of the location the agent is currently at.
    fn location(&self) -> String;
    fn set_location(&self, location: String);

    fn is_in_conversation(&self) -> bool;
    fn set_in_conversation(&self, in_conversation: bool);

    fn plan(&self) -> Option<Plan>;

    fn current_action(&self) -> String;
    fn set_current_action(&self, action: String);

    /// Running total of observation importance since the last reflection.
    fn importance(&self) -> &ImportanceAccumulator;

    /// Take in the surroundings and record an observation.
    async fn observe(&self) -> Result<()>;
    /// Decide the action for the next granularity step. May start a conversation.
    async fn plan_moment(&self) -> Result<()>;
    /// Decide where to be for the next step.
    async fn plan_place(&self) -> Result<()>;
    /// Derive higher-level insights from recent memories.
    async fn reflect(&self) -> Result<()>;
    /// Regenerate the full-day plan.
    async fn plan_day(&self) -> Result<()>;
    /// Regenerate the detailed plan for the rest of the current hour.
    async fn plan_rest_of_hour(&self, reason: Option<String>) -> Result<()>;
    /// Rewrite the agent's self-summary from its memories.
    async fn synthesize_summary(&self) -> Result<()>;
    /// Remember a finished conversation.
    async fn reflect_over_conversation(&self, transcript: &str) -> Result<()>;
}

/// Lock-free accumulator of observation importance.
#[derive(Debug, Default)]
pub struct ImportanceAccumulator(AtomicU32);

impl ImportanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `importance` and return the new total.
    pub fn add(&self, importance: u32) -> u32 {
        self.0
            .fetch_add(importance, Ordering::AcqRel)
            .saturating_add(importance)
    }

    pub fn value(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Atomically reset to zero if the total has reached `threshold`.
    /// Returns whether it did.
    pub fn take_if_reached(&self, threshold: u32) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v >= threshold).then_some(0)
            })
            .is_ok()
    }
}
