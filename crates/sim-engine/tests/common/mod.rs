#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use chrono::NaiveDateTime;
use sim_core::{ActionLog, AgentRef, ImportanceAccumulator, Plan, Result, SimAgent, SimError};
use sim_engine::{Dialogue, Turn, TurnTaker};

/// An agent whose operations only record that they were called, optionally
/// failing a set number of times.
pub struct ScriptedAgent {
    name: String,
    location: RwLock<String>,
    in_conversation: AtomicBool,
    plan: RwLock<Option<Plan>>,
    action: RwLock<String>,
    importance: ImportanceAccumulator,
    observe_importance: u32,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, u32>>,
    conversation_transcripts: Mutex<Vec<String>>,
    panic_on: Option<String>,
}

impl ScriptedAgent {
    pub fn new(name: &str, location: &str) -> Self {
        Self {
            name: name.to_string(),
            location: RwLock::new(location.to_string()),
            in_conversation: AtomicBool::new(false),
            plan: RwLock::new(None),
            action: RwLock::new("idle".to_string()),
            importance: ImportanceAccumulator::new(),
            observe_importance: 0,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            conversation_transcripts: Mutex::new(Vec::new()),
            panic_on: None,
        }
    }

    /// Importance each `observe` adds to the accumulator.
    pub fn observing(mut self, importance: u32) -> Self {
        self.observe_importance = importance;
        self
    }

    pub fn with_plan(self, plan: Plan) -> Self {
        *self.plan.write() = Some(plan);
        self
    }

    /// Fail the next `times` calls of `op` (`u32::MAX` fails forever).
    pub fn failing(self, op: &str, times: u32) -> Self {
        self.failures.lock().insert(op.to_string(), times);
        self
    }

    /// Panic inside `op`.
    pub fn panicking(mut self, op: &str) -> Self {
        self.panic_on = Some(op.to_string());
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == op).count()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn transcripts(&self) -> Vec<String> {
        self.conversation_transcripts.lock().clone()
    }

    fn call(&self, op: &str) -> Result<()> {
        self.calls.lock().push(op.to_string());
        if self.panic_on.as_deref() == Some(op) {
            panic!("{} panicked in {op}", self.name);
        }
        let mut failures = self.failures.lock();
        match failures.get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                Err(SimError::agent(&self.name, format!("{op} failed")))
            }
            _ => Ok(()),
        }
    }
}

pub fn agent_ref(agent: &Arc<ScriptedAgent>) -> AgentRef {
    agent.clone()
}

#[async_trait]
impl SimAgent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> String {
        self.location.read().clone()
    }

    fn set_location(&self, location: String) {
        *self.location.write() = location;
    }

    fn is_in_conversation(&self) -> bool {
        self.in_conversation.load(Ordering::SeqCst)
    }

    fn set_in_conversation(&self, in_conversation: bool) {
        self.in_conversation.store(in_conversation, Ordering::SeqCst);
    }

    fn plan(&self) -> Option<Plan> {
        self.plan.read().clone()
    }

    fn current_action(&self) -> String {
        self.action.read().clone()
    }

    fn set_current_action(&self, action: String) {
        *self.action.write() = action;
    }

    fn importance(&self) -> &ImportanceAccumulator {
        &self.importance
    }

    async fn observe(&self) -> Result<()> {
        self.call("observe")?;
        self.importance.add(self.observe_importance);
        Ok(())
    }

    async fn plan_moment(&self) -> Result<()> {
        self.call("plan_moment")
    }

    async fn plan_place(&self) -> Result<()> {
        self.call("plan_place")
    }

    async fn reflect(&self) -> Result<()> {
        self.call("reflect")
    }

    async fn plan_day(&self) -> Result<()> {
        self.call("plan_day")?;
        *self.plan.write() = Some(Plan::from_daily("7:00) Wake up\n8:00) Work"));
        Ok(())
    }

    async fn plan_rest_of_hour(&self, _reason: Option<String>) -> Result<()> {
        self.call("plan_rest_of_hour")?;
        let mut plan = self.plan.write();
        let current = plan.take().unwrap_or_default();
        *plan = Some(current.with_hourly("Brew coffee\nRead paper\nWalk\nShower\nDress\nLeave"));
        Ok(())
    }

    async fn synthesize_summary(&self) -> Result<()> {
        self.call("synthesize_summary")
    }

    async fn reflect_over_conversation(&self, transcript: &str) -> Result<()> {
        self.conversation_transcripts.lock().push(transcript.to_string());
        self.call("reflect_over_conversation")
    }
}

/// Action log that keeps every entry in memory.
#[derive(Default)]
pub struct RecordingActions {
    entries: Mutex<Vec<(String, NaiveDateTime, String)>>,
}

impl RecordingActions {
    pub fn entries(&self) -> Vec<(String, NaiveDateTime, String)> {
        self.entries.lock().clone()
    }

    pub fn for_agent(&self, agent: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(a, _, _)| a == agent)
            .map(|(_, _, action)| action.clone())
            .collect()
    }
}

#[async_trait]
impl ActionLog for RecordingActions {
    async fn record(&self, agent: &str, at: NaiveDateTime, action: &str) -> Result<()> {
        self.entries
            .lock()
            .push((agent.to_string(), at, action.to_string()));
        Ok(())
    }
}

/// Every conversation it opens plays the same script: `Some(should_end)` is a
/// successful turn, `None` a failed one. Past the end of the script turns
/// succeed without ending.
pub struct ScriptedDialogue {
    script: Vec<Option<bool>>,
}

impl ScriptedDialogue {
    pub fn new(script: Vec<Option<bool>>) -> Arc<Self> {
        Arc::new(Self { script })
    }
}

struct ScriptedTurns {
    script: Mutex<VecDeque<Option<bool>>>,
    line: Mutex<u32>,
}

#[async_trait]
impl TurnTaker for ScriptedTurns {
    async fn take_turn(
        &self,
        speaker: &AgentRef,
        _listener: &AgentRef,
        _transcript: &str,
    ) -> Result<Turn> {
        let next = self.script.lock().pop_front().unwrap_or(Some(false));
        match next {
            Some(should_end) => {
                let mut line = self.line.lock();
                *line += 1;
                Ok(Turn {
                    text: format!("line {}", *line),
                    should_end,
                })
            }
            None => Err(SimError::Llm(format!("{} could not speak", speaker.name()))),
        }
    }
}

#[async_trait]
impl Dialogue for ScriptedDialogue {
    async fn open(
        &self,
        _instigator: &AgentRef,
        _target: &AgentRef,
    ) -> Result<Box<dyn TurnTaker>> {
        Ok(Box::new(ScriptedTurns {
            script: Mutex::new(self.script.iter().copied().collect()),
            line: Mutex::new(0),
        }))
    }
}

/// A dialogue that can never be opened.
pub struct FailingDialogue;

#[async_trait]
impl Dialogue for FailingDialogue {
    async fn open(
        &self,
        instigator: &AgentRef,
        target: &AgentRef,
    ) -> Result<Box<dyn TurnTaker>> {
        Err(SimError::Conversation(format!(
            "{} and {} have nothing to say",
            instigator.name(),
            target.name()
        )))
    }
}
