//! # Tick scheduler
//!
//! Fires at a fixed real-time rate. Each tick classifies the moment, fans the
//! moment out over every location group in parallel, advances simulated time
//! when the moment calls for it, and finally drains the deferred-mutation
//! queue. Anything that escapes per-agent isolation is captured into the
//! [`ErrorChannel`] instead of unwinding the scheduler.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sim_core::{EventBus, Result, SimClock, SimError, SimEvent};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::moment::{Moment, MomentClassifier, MomentContext, MomentReport};
use crate::registry::AgentRegistry;
use crate::world::WorldMap;

/// A unit of operator work that runs strictly between ticks.
pub type Mutation = Box<dyn FnOnce() -> Result<()> + Send>;

/// FIFO queue of deferred mutations. Enqueue is safe from any task; the
/// scheduler drains it once per tick after all agent work has finished.
#[derive(Default)]
pub struct DeferredQueue {
    queue: Mutex<Vec<Mutation>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue<F>(&self, mutation: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.queue.lock().push(Box::new(mutation));
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Run and clear everything queued so far, in order. Mutations queued while
    /// draining wait for the next drain. Returns the failures.
    pub fn drain(&self) -> Vec<SimError> {
        let pending = std::mem::take(&mut *self.queue.lock());
        let mut failures = Vec::new();
        for mutation in pending {
            match catch_unwind(AssertUnwindSafe(mutation)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(SimError::MutationFailed(e.to_string())),
                Err(panic) => failures.push(SimError::MutationFailed(panic_message(&*panic))),
            }
        }
        failures
    }
}

/// Holds the last tick-level error until the host polls it.
#[derive(Default)]
pub struct ErrorChannel {
    last: Mutex<Option<SimError>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, error: SimError) {
        *self.last.lock() = Some(error);
    }

    /// Take the last error, if any. Each error is observed at most once.
    pub fn poll(&self) -> Option<SimError> {
        self.last.lock().take()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub moment: Moment,
    pub groups: usize,
    pub failed_agents: Vec<String>,
    pub errors: usize,
}

/// Operator-facing handle onto a running simulation.
#[derive(Clone)]
pub struct SimHandle {
    pub(crate) agents: Arc<AgentRegistry>,
    pub(crate) conversations: Arc<crate::conversation::ConversationRegistry>,
    pub(crate) world: Arc<WorldMap>,
    pub(crate) mutations: Arc<DeferredQueue>,
    pub(crate) errors: Arc<ErrorChannel>,
    pub(crate) clock: SimClock,
    pub(crate) events: EventBus,
    pub(crate) shutdown: CancellationToken,
}

impl SimHandle {
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn conversations(&self) -> &Arc<crate::conversation::ConversationRegistry> {
        &self.conversations
    }

    pub fn world(&self) -> &Arc<WorldMap> {
        &self.world
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Queue work to run between ticks.
    pub fn enqueue<F>(&self, mutation: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.mutations.enqueue(mutation);
    }

    /// Queue a status change for an item. Applied at the next drain; an
    /// unknown location or item surfaces as a failed mutation.
    pub fn set_item_status(
        &self,
        location: impl Into<String>,
        item: impl Into<String>,
        status: impl Into<String>,
    ) {
        let world = Arc::clone(&self.world);
        let (location, item, status) = (location.into(), item.into(), status.into());
        self.enqueue(move || world.set_item_status(&location, &item, &status));
    }

    /// Poll-once-and-clear access to the last tick-level error.
    pub fn poll_error(&self) -> Option<SimError> {
        self.errors.poll()
    }

    /// Stop scheduling ticks and conversation iterations.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

pub struct SimScheduler {
    period: Duration,
    clock: SimClock,
    classifier: MomentClassifier,
    agents: Arc<AgentRegistry>,
    context: Arc<MomentContext>,
    mutations: Arc<DeferredQueue>,
    errors: Arc<ErrorChannel>,
    events: EventBus,
    ticks: u64,
}

impl SimScheduler {
    pub fn new(
        period: Duration,
        agents: Arc<AgentRegistry>,
        context: MomentContext,
        mutations: Arc<DeferredQueue>,
        errors: Arc<ErrorChannel>,
    ) -> Self {
        let clock = context.clock.clone();
        let events = context.events.clone();
        Self {
            period,
            classifier: MomentClassifier::new(clock.day_start()),
            clock,
            agents,
            context: Arc::new(context),
            mutations,
            errors,
            events,
            ticks: 0,
        }
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Classify the current instant and run one tick.
    pub async fn tick(&mut self) -> TickReport {
        let moment = self.classifier.classify(self.clock.now());
        self.run_tick(moment).await
    }

    /// Run one tick as `moment`, bypassing classification.
    pub async fn run_tick(&mut self, moment: Moment) -> TickReport {
        self.ticks += 1;
        let tick = self.ticks;
        let sim_time = self.clock.now();
        debug!(tick, moment = moment.as_str(), sim_time = %sim_time, "tick started");
        self.events.publish(SimEvent::TickStarted {
            tick,
            moment: moment.as_str().into(),
            sim_time,
        });

        let groups = self.agents.grouped_by_location();
        let group_count = groups.len();
        let handles: Vec<_> = groups
            .into_iter()
            .map(|(location, group)| {
                let context = Arc::clone(&self.context);
                let handle = tokio::spawn(async move { moment.elapse(group, &context).await });
                (location, handle)
            })
            .collect();

        let mut failed_agents = Vec::new();
        let mut errors = Vec::new();
        for (location, handle) in handles {
            match handle.await {
                Ok(Ok(MomentReport { failed, .. })) => failed_agents.extend(failed),
                Ok(Err(e)) => {
                    error!(tick, location = %location, error = %e, "location group failed");
                    errors.push(e);
                }
                Err(join_error) => {
                    let reason = if join_error.is_panic() {
                        panic_message(&*join_error.into_panic())
                    } else {
                        join_error.to_string()
                    };
                    error!(tick, location = %location, reason = %reason, "location group panicked");
                    errors.push(SimError::TickPanicked { tick, reason });
                }
            }
        }

        if moment.elapses_time() {
            self.clock.advance();
        }

        for e in self.mutations.drain() {
            error!(tick, error = %e, "deferred mutation failed");
            errors.push(e);
        }

        let error_count = errors.len();
        for e in errors {
            self.events.publish(SimEvent::TickFailed {
                tick,
                error: e.to_string(),
            });
            self.errors.report(e);
        }

        self.events.publish(SimEvent::TickCompleted {
            tick,
            moment: moment.as_str().into(),
            sim_time: self.clock.now(),
            groups: group_count,
        });

        TickReport {
            tick,
            moment,
            groups: group_count,
            failed_agents,
            errors: error_count,
        }
    }

    /// Tick at a fixed rate until `shutdown` fires or `max_ticks` ticks have
    /// run, in which case `shutdown` is cancelled. Late ticks are caught up. A
    /// tick in flight always completes. Returns the number of ticks run.
    pub async fn run(mut self, shutdown: CancellationToken, max_ticks: Option<u64>) -> u64 {
        info!(period_ms = self.period.as_millis() as u64, "scheduler started");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            if max_ticks.is_some_and(|max| self.ticks >= max) {
                info!(ticks = self.ticks, "tick limit reached");
                shutdown.cancel();
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.tick().await;
        }

        info!(ticks = self.ticks, sim_time = %self.clock.date_time_string(), "scheduler stopped");
        self.ticks
    }
}
