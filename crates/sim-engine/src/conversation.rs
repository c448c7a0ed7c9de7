//! # Conversations
//!
//! A conversation is started by an agent during its Reactive planning and then
//! advanced by the [`ConversationLoop`], independently of the tick scheduler.
//! Each iteration of the loop takes a snapshot of the active conversations and
//! advances every one of them by exactly one turn, concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use sim_core::{AgentRef, EventBus, Result, SimError, SimEvent};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One speaker's contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub text: String,
    pub should_end: bool,
}

/// Produces the lines of one conversation.
#[async_trait]
pub trait TurnTaker: Send + Sync {
    async fn take_turn(
        &self,
        speaker: &AgentRef,
        listener: &AgentRef,
        transcript: &str,
    ) -> Result<Turn>;
}

/// Opens a [`TurnTaker`] for a new conversation, e.g. by preparing each
/// participant's context.
#[async_trait]
pub trait Dialogue: Send + Sync {
    async fn open(&self, instigator: &AgentRef, target: &AgentRef)
    -> Result<Box<dyn TurnTaker>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Instigator,
    Target,
}

#[derive(Default)]
struct ConversationState {
    transcript: String,
    last_speaker: Option<Side>,
    turns: u32,
    failures: u32,
}

pub struct Conversation {
    id: Uuid,
    instigator: AgentRef,
    target: AgentRef,
    turns: Box<dyn TurnTaker>,
    state: Mutex<ConversationState>,
}

impl Conversation {
    /// Reserve both participants while the dialogue opens.
    fn claim(instigator: &AgentRef, target: &AgentRef) {
        instigator.set_in_conversation(true);
        target.set_in_conversation(true);
    }

    /// Participants are already claimed; their actions change only once the
    /// dialogue is open.
    fn new(instigator: AgentRef, target: AgentRef, turns: Box<dyn TurnTaker>) -> Self {
        instigator.set_current_action(format!("conversing with {}", target.name()));
        target.set_current_action(format!("conversing with {}", instigator.name()));
        Self {
            id: Uuid::new_v4(),
            instigator,
            target,
            turns,
            state: Mutex::new(ConversationState::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn instigator(&self) -> &AgentRef {
        &self.instigator
    }

    pub fn target(&self) -> &AgentRef {
        &self.target
    }

    pub fn transcript(&self) -> String {
        self.state.lock().transcript.clone()
    }

    /// Successful turns so far.
    pub fn turn_count(&self) -> u32 {
        self.state.lock().turns
    }

    /// Consecutive failed turns.
    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }

    pub fn last_speaker(&self) -> Option<&AgentRef> {
        self.state.lock().last_speaker.map(|side| self.agent(side))
    }

    pub fn involves(&self, name: &str) -> bool {
        self.instigator.name() == name || self.target.name() == name
    }

    fn agent(&self, side: Side) -> &AgentRef {
        match side {
            Side::Instigator => &self.instigator,
            Side::Target => &self.target,
        }
    }

    /// Advance by one turn. Returns whether the conversation should end.
    ///
    /// The target speaks first, then speakers alternate. A failed turn leaves
    /// the speaker and transcript untouched.
    pub async fn converse(&self) -> Result<bool> {
        let (side, transcript) = {
            let state = self.state.lock();
            let side = match state.last_speaker {
                Some(Side::Target) => Side::Instigator,
                Some(Side::Instigator) | None => Side::Target,
            };
            (side, state.transcript.clone())
        };
        let (speaker, listener) = match side {
            Side::Instigator => (&self.instigator, &self.target),
            Side::Target => (&self.target, &self.instigator),
        };

        match self.turns.take_turn(speaker, listener, &transcript).await {
            Ok(turn) => {
                let mut state = self.state.lock();
                state.transcript.push_str(&format!("{}: {}\n", speaker.name(), turn.text));
                state.last_speaker = Some(side);
                state.turns += 1;
                state.failures = 0;
                Ok(turn.should_end)
            }
            Err(e) => {
                self.state.lock().failures += 1;
                Err(e)
            }
        }
    }

    /// Conclude: both participants reflect over the transcript concurrently and
    /// are released. Participants are released even when a reflection fails.
    pub async fn end(&self) -> Result<()> {
        let transcript = self.transcript();
        let pair = [(&self.instigator, &self.target), (&self.target, &self.instigator)];
        let results = join_all(pair.iter().map(|(agent, other)| {
            let transcript = &transcript;
            async move {
                let result = agent.reflect_over_conversation(transcript).await;
                agent.set_in_conversation(false);
                agent.set_current_action(format!("Finishing conversation with {}", other.name()));
                result
            }
        }))
        .await;
        results.into_iter().collect()
    }

    /// Release both participants without reflecting.
    pub fn release(&self) {
        self.instigator.set_in_conversation(false);
        self.target.set_in_conversation(false);
    }
}

/// The active conversations.
///
/// Add, remove and snapshot share one lock, and adding always wakes a task
/// blocked in [`ConversationRegistry::wait_for_active`].
pub struct ConversationRegistry {
    active: Mutex<Vec<Arc<Conversation>>>,
    notify: Notify,
    started: AtomicU64,
    dialogue: Arc<dyn Dialogue>,
    events: EventBus,
}

impl ConversationRegistry {
    pub fn new(dialogue: Arc<dyn Dialogue>, events: EventBus) -> Self {
        Self {
            active: Mutex::new(Vec::new()),
            notify: Notify::new(),
            started: AtomicU64::new(0),
            dialogue,
            events,
        }
    }

    /// Start a conversation between two distinct agents that are both free.
    ///
    /// Returns `Ok(None)` when either agent is already conversing.
    pub async fn start(&self, instigator: AgentRef, target: AgentRef) -> Result<Option<Uuid>> {
        if instigator.name() == target.name() {
            return Err(SimError::Conversation(format!(
                "{} cannot talk to themselves",
                instigator.name()
            )));
        }
        {
            let _guard = self.active.lock();
            if instigator.is_in_conversation() || target.is_in_conversation() {
                debug!(instigator = %instigator.name(), target = %target.name(), "participant busy");
                return Ok(None);
            }
            Conversation::claim(&instigator, &target);
        }

        let turns = match self.dialogue.open(&instigator, &target).await {
            Ok(turns) => turns,
            Err(e) => {
                instigator.set_in_conversation(false);
                target.set_in_conversation(false);
                return Err(e);
            }
        };

        let conversation = Arc::new(Conversation::new(instigator, target, turns));
        let id = conversation.id();
        info!(
            conversation = %id,
            instigator = %conversation.instigator().name(),
            target = %conversation.target().name(),
            "conversation started"
        );
        self.events.publish(SimEvent::ConversationStarted {
            conversation_id: id,
            instigator: conversation.instigator().name().to_string(),
            target: conversation.target().name().to_string(),
        });
        self.add(conversation);
        Ok(Some(id))
    }

    pub fn add(&self, conversation: Arc<Conversation>) {
        let mut active = self.active.lock();
        active.push(conversation);
        self.started.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<Conversation>> {
        let mut active = self.active.lock();
        let index = active.iter().position(|c| c.id() == id)?;
        Some(active.remove(index))
    }

    pub fn snapshot(&self) -> Vec<Arc<Conversation>> {
        self.active.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }

    /// Conversations started over the whole run.
    pub fn total_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Wait until at least one conversation is active.
    pub async fn wait_for_active(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an add in between is not missed
            notified.as_mut().enable();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// Advances active conversations turn by turn until they end.
pub struct ConversationLoop {
    registry: Arc<ConversationRegistry>,
    events: EventBus,
    /// Consecutive failed turns after which a conversation is evicted. 0 = never.
    max_turn_failures: u32,
    /// Pause after an iteration in which every turn failed.
    failure_backoff: Duration,
    shutdown: CancellationToken,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Iteration {
    advanced: usize,
    failed: usize,
}

impl Iteration {
    fn all_failed(&self) -> bool {
        self.advanced > 0 && self.failed == self.advanced
    }
}

impl ConversationLoop {
    pub fn new(
        registry: Arc<ConversationRegistry>,
        events: EventBus,
        max_turn_failures: u32,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            events,
            max_turn_failures,
            failure_backoff: Self::DEFAULT_FAILURE_BACKOFF,
            shutdown,
        }
    }

    pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(1);

    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    /// Advance every currently active conversation by one turn. Returns how
    /// many conversations were advanced.
    pub async fn iterate(&self) -> usize {
        self.advance().await.advanced
    }

    async fn advance(&self) -> Iteration {
        let snapshot = self.registry.snapshot();
        let results = join_all(snapshot.iter().map(|c| c.converse())).await;
        let failed = results.iter().filter(|r| r.is_err()).count();

        join_all(
            snapshot
                .iter()
                .zip(results)
                .map(|(conversation, result)| self.settle(conversation, result)),
        )
        .await;
        Iteration {
            advanced: snapshot.len(),
            failed,
        }
    }

    async fn settle(&self, conversation: &Arc<Conversation>, result: Result<bool>) {
        let id = conversation.id();
        match result {
            Ok(should_end) => {
                if let Some(speaker) = conversation.last_speaker() {
                    self.events.publish(SimEvent::ConversationTurn {
                        conversation_id: id,
                        speaker: speaker.name().to_string(),
                    });
                }
                if !should_end {
                    return;
                }
                if let Err(e) = conversation.end().await {
                    error!(conversation = %id, error = %e, "reflection over conversation failed");
                }
                self.registry.remove(id);
                let turns = conversation.turn_count();
                info!(conversation = %id, turns, "conversation ended");
                self.events.publish(SimEvent::ConversationEnded {
                    conversation_id: id,
                    turns,
                });
            }
            Err(e) => {
                let failures = conversation.failures();
                warn!(conversation = %id, failures, error = %e, "conversation turn failed");
                if self.max_turn_failures > 0 && failures >= self.max_turn_failures {
                    conversation.release();
                    self.registry.remove(id);
                    error!(conversation = %id, failures, "evicting stuck conversation");
                    self.events.publish(SimEvent::ConversationEvicted {
                        conversation_id: id,
                        failures,
                    });
                }
            }
        }
    }

    /// Loop until shutdown. An iteration in progress always completes.
    pub async fn run(self) {
        info!("conversation loop started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.registry.wait_for_active() => {}
            }
            let iteration = self.advance().await;
            if iteration.all_failed() && !self.failure_backoff.is_zero() {
                debug!(
                    failed = iteration.failed,
                    backoff = ?self.failure_backoff,
                    "every turn failed, backing off"
                );
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.failure_backoff) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
        info!("conversation loop stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
