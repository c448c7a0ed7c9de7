use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::info;

use crate::error::Result;

/// Sink for the action each agent ends a reactive tick with.
#[async_trait]
pub trait ActionLog: Send + Sync {
    async fn record(&self, agent: &str, at: NaiveDateTime, action: &str) -> Result<()>;
}

/// Emits every action as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActionLog;

#[async_trait]
impl ActionLog for TracingActionLog {
    async fn record(&self, agent: &str, at: NaiveDateTime, action: &str) -> Result<()> {
        info!(target: "simulacra::actions", agent, at = %at.format("%H:%M"), action, "agent action");
        Ok(())
    }
}
