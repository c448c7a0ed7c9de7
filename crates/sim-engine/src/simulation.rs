use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use sim_config::SimConfig;
use sim_core::{ActionLog, EventBus, Result, SimClock, SimError, SimEvent, TracingActionLog};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::conversation::{ConversationLoop, ConversationRegistry, Dialogue};
use crate::moment::MomentContext;
use crate::registry::AgentRegistry;
use crate::scheduler::{DeferredQueue, ErrorChannel, SimHandle, SimScheduler};
use crate::world::WorldMap;

/// Owns the shared state of a simulation while its agents are being built.
///
/// Agents need the registries before the scheduler exists, so the builder
/// hands them out first and assembles the [`Simulation`] last.
pub struct SimulationBuilder {
    config: SimConfig,
    clock: SimClock,
    events: EventBus,
    agents: Arc<AgentRegistry>,
    conversations: Arc<ConversationRegistry>,
    world: Arc<WorldMap>,
    actions: Arc<dyn ActionLog>,
}

impl SimulationBuilder {
    pub fn new(config: &SimConfig, dialogue: Arc<dyn Dialogue>) -> Self {
        let events = EventBus::default();
        Self {
            clock: SimClock::new(config.clock.start, config.clock.granularity_minutes),
            agents: Arc::new(AgentRegistry::new()),
            conversations: Arc::new(ConversationRegistry::new(dialogue, events.clone())),
            world: Arc::new(WorldMap::from_config(&config.world)),
            actions: Arc::new(TracingActionLog),
            events,
            config: config.clone(),
        }
    }

    pub fn with_action_log(mut self, actions: Arc<dyn ActionLog>) -> Self {
        self.actions = actions;
        self
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn conversations(&self) -> &Arc<ConversationRegistry> {
        &self.conversations
    }

    pub fn world(&self) -> &Arc<WorldMap> {
        &self.world
    }

    pub fn build(self) -> Simulation {
        let shutdown = CancellationToken::new();
        let mutations = Arc::new(DeferredQueue::new());
        let errors = Arc::new(ErrorChannel::new());

        let context = MomentContext {
            clock: self.clock.clone(),
            actions: self.actions,
            events: self.events.clone(),
            reflection_threshold: self.config.scheduler.reflection_threshold,
        };
        let scheduler = SimScheduler::new(
            Duration::from_millis(self.config.scheduler.tick_period_ms),
            Arc::clone(&self.agents),
            context,
            Arc::clone(&mutations),
            Arc::clone(&errors),
        );
        let conversation_loop = ConversationLoop::new(
            Arc::clone(&self.conversations),
            self.events.clone(),
            self.config.conversation.max_turn_failures,
            shutdown.clone(),
        )
        .with_failure_backoff(Duration::from_millis(
            self.config.conversation.failure_backoff_ms,
        ));

        Simulation {
            scheduler,
            conversation_loop,
            handle: SimHandle {
                agents: self.agents,
                conversations: self.conversations,
                world: Arc::clone(&self.world),
                mutations,
                errors,
                clock: self.clock,
                events: self.events,
                shutdown,
            },
            locations: self.world.len(),
        }
    }
}

/// A fully assembled simulation that has not started yet.
pub struct Simulation {
    scheduler: SimScheduler,
    conversation_loop: ConversationLoop,
    handle: SimHandle,
    locations: usize,
}

impl Simulation {
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    /// Direct access to the scheduler, for stepping ticks by hand.
    pub fn scheduler_mut(&mut self) -> &mut SimScheduler {
        &mut self.scheduler
    }

    pub fn conversation_loop(&self) -> &ConversationLoop {
        &self.conversation_loop
    }

    /// Spawn the scheduler and the conversation loop.
    pub fn start(self, max_ticks: Option<u64>) -> RunningSimulation {
        let started_at = self.handle.clock.now();
        info!(
            agents = self.handle.agents.count(),
            start = %self.handle.clock.date_time_string(),
            "simulation starting"
        );
        let scheduler = tokio::spawn(self.scheduler.run(self.handle.shutdown.clone(), max_ticks));
        let conversations = self.conversation_loop.spawn();
        RunningSimulation {
            handle: self.handle,
            scheduler,
            conversations,
            started_at,
            locations: self.locations,
        }
    }
}

pub struct RunningSimulation {
    handle: SimHandle,
    scheduler: JoinHandle<u64>,
    conversations: JoinHandle<()>,
    started_at: NaiveDateTime,
    locations: usize,
}

impl RunningSimulation {
    pub fn handle(&self) -> &SimHandle {
        &self.handle
    }

    /// Whether the scheduler has stopped on its own (tick limit reached).
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Stop both loops, wait for in-flight work, and summarize the run.
    pub async fn shutdown(self) -> Result<RunSummary> {
        self.handle.shutdown();
        let ticks = self
            .scheduler
            .await
            .map_err(|e| SimError::Scheduler(format!("scheduler task failed: {e}")))?;
        self.conversations
            .await
            .map_err(|e| SimError::Scheduler(format!("conversation loop failed: {e}")))?;
        self.handle.events.publish(SimEvent::Shutdown);

        let clock = &self.handle.clock;
        Ok(RunSummary {
            started_at: self.started_at,
            ended_at: clock.now(),
            ticks,
            simulated_hours: clock.elapsed_hours(),
            agents: self.handle.agents.count(),
            locations: self.locations,
            conversations: self.handle.conversations.total_started(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub started_at: NaiveDateTime,
    pub ended_at: NaiveDateTime,
    pub ticks: u64,
    pub simulated_hours: i64,
    pub agents: usize,
    pub locations: usize,
    pub conversations: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulation started at {}", self.started_at.format("%A %B %-d %H:%M"))?;
        writeln!(f, "Simulation ended at   {}", self.ended_at.format("%A %B %-d %H:%M"))?;
        writeln!(f, "Ticks:                {}", self.ticks)?;
        writeln!(f, "Simulated hours:      {}", self.simulated_hours)?;
        writeln!(f, "Agents:               {}", self.agents)?;
        writeln!(f, "Locations:            {}", self.locations)?;
        write!(f, "Conversations:        {}", self.conversations)
    }
}
