//! An agent whose decisions come from a chat model.
//!
//! A persona keeps its mutable state behind locks because the scheduler and
//! the conversation loop reach it concurrently. Every collaborator call goes
//! through [`PersonaServices`]; every piece of shared world state through
//! [`World`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Timelike;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use sim_config::{AgentSeed, MemoryConfig, SimConfig};
use sim_core::{AgentRef, ImportanceAccumulator, Plan, Result, SimAgent, SimClock, SimError};
use sim_engine::{AgentRegistry, ConversationRegistry, SimulationBuilder, WorldMap};
use sim_llm::{ChatProvider, ChatRequest, EmbeddingProvider, complete_json};
use sim_memory::{MemoryKind, MemoryRecord, MemoryStream};
use tracing::{debug, info};

use crate::prompts::{self, DayPrompt, MomentPrompt};

/// Importance of a reflection's insights.
const REFLECTION_IMPORTANCE: u8 = 7;

/// The collaborators every persona shares.
pub struct PersonaServices {
    pub chat: Arc<dyn ChatProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub memory: Arc<dyn MemoryStream>,
    pub chat_model: String,
    pub temperature: f32,
    pub limits: MemoryConfig,
}

impl PersonaServices {
    pub fn new(
        config: &SimConfig,
        chat: Arc<dyn ChatProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        memory: Arc<dyn MemoryStream>,
    ) -> Self {
        Self {
            chat,
            embedder,
            memory,
            chat_model: config.services.chat_model.clone(),
            temperature: config.services.temperature,
            limits: config.memory.clone(),
        }
    }

    fn request(&self, prompt: String) -> ChatRequest {
        ChatRequest::new(&self.chat_model, prompt).with_temperature(self.temperature)
    }

    pub(crate) async fn ask(&self, prompt: String) -> Result<String> {
        let response = self.chat.chat(&self.request(prompt)).await?;
        Ok(response.text.trim().to_string())
    }

    pub(crate) async fn ask_json<T: DeserializeOwned>(&self, prompt: String) -> Result<T> {
        complete_json(self.chat.as_ref(), &self.request(prompt)).await
    }

    pub(crate) async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embedder.embed(texts).await
    }
}

/// The shared simulation state a persona reads and acts on.
#[derive(Clone)]
pub struct World {
    pub clock: SimClock,
    pub agents: Arc<AgentRegistry>,
    pub conversations: Arc<ConversationRegistry>,
    pub map: Arc<WorldMap>,
}

impl World {
    pub fn new(builder: &SimulationBuilder) -> Self {
        Self {
            clock: builder.clock().clone(),
            agents: Arc::clone(builder.agents()),
            conversations: Arc::clone(builder.conversations()),
            map: Arc::clone(builder.world()),
        }
    }
}

pub struct Persona {
    this: Weak<Persona>,
    name: String,
    age: u32,
    traits: Vec<String>,
    home: String,
    circadian_rhythm: String,
    services: Arc<PersonaServices>,
    world: World,

    location: RwLock<String>,
    in_conversation: AtomicBool,
    plan: RwLock<Option<Plan>>,
    summary: RwLock<String>,
    action: RwLock<String>,
    latest_observation: RwLock<Option<String>>,
    importance: ImportanceAccumulator,
}

impl Persona {
    /// Create a persona standing at its home.
    pub fn new(seed: &AgentSeed, services: Arc<PersonaServices>, world: World) -> Arc<Self> {
        let summary = format!(
            "Name: {}; Age: {}; Traits: {}",
            seed.name,
            seed.age,
            seed.traits.join(", ")
        );
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            name: seed.name.clone(),
            age: seed.age,
            traits: seed.traits.clone(),
            home: seed.home.clone(),
            circadian_rhythm: seed.circadian_rhythm.clone(),
            services,
            world,
            location: RwLock::new(seed.home.clone()),
            in_conversation: AtomicBool::new(false),
            plan: RwLock::new(None),
            summary: RwLock::new(summary),
            action: RwLock::new("idle".to_string()),
            latest_observation: RwLock::new(None),
            importance: ImportanceAccumulator::new(),
        })
    }

    pub fn summary(&self) -> String {
        self.summary.read().clone()
    }

    pub fn latest_observation(&self) -> Option<String> {
        self.latest_observation.read().clone()
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    pub(crate) fn services(&self) -> &PersonaServices {
        &self.services
    }

    pub(crate) fn clock(&self) -> &SimClock {
        &self.world.clock
    }

    fn this(&self) -> Result<AgentRef> {
        let this: Arc<Persona> = self
            .this
            .upgrade()
            .ok_or_else(|| SimError::agent(&self.name, "persona is no longer alive"))?;
        Ok(this as AgentRef)
    }

    /// Other agents at the same location.
    fn neighbours(&self) -> Vec<AgentRef> {
        self.world
            .agents
            .at_location(&self.location())
            .into_iter()
            .filter(|a| a.name() != self.name)
            .collect()
    }

    async fn remember(&self, kind: MemoryKind, importance: u8, text: String) -> Result<()> {
        let embedding = self
            .services
            .embed(&[text.as_str()])
            .await?
            .pop()
            .unwrap_or_default();
        let record = MemoryRecord::new(
            &self.name,
            self.world.clock.elapsed_hours(),
            importance,
            kind,
            text,
            embedding,
        );
        self.services.memory.save(record).await
    }

    /// Memory texts for each query, aligned with `queries`.
    pub(crate) async fn recall(&self, queries: &[String], limit: usize) -> Result<Vec<Vec<String>>> {
        let texts: Vec<&str> = queries.iter().map(String::as_str).collect();
        let embeddings = self.services.embed(&texts).await?;
        let results = self
            .services
            .memory
            .most_relevant(&self.name, &embeddings, limit, self.world.clock.elapsed_hours())
            .await?;
        Ok(results
            .into_iter()
            .map(|records| records.into_iter().map(|r| r.text).collect())
            .collect())
    }

    /// Condense `context` into an observation, count its importance, and store it.
    async fn synthesize_observation(&self, context: &str, kind: MemoryKind) -> Result<()> {
        let answer: prompts::ObservationAnswer = self
            .services
            .ask_json(prompts::observation(&self.summary(), context))
            .await?;
        let importance = answer.importance.clamp(1, MemoryRecord::MAX_IMPORTANCE);
        debug!(agent = %self.name, importance, observation = %answer.observation, "observed");

        self.importance.add(u32::from(importance));
        *self.latest_observation.write() = Some(answer.observation.clone());
        self.remember(kind, importance, answer.observation).await
    }

    async fn replan_day(&self, reason: String) -> Result<()> {
        info!(agent = %self.name, reason = %reason, "replanning day");
        let clock = &self.world.clock;
        let now = clock.now();
        let next_hour = if now.minute() > 0 {
            (now.hour() + 1) % 24
        } else {
            now.hour()
        };
        let previous = self.plan();
        let prompt = prompts::day(&DayPrompt {
            summary: &self.summary(),
            circadian_rhythm: &self.circadian_rhythm,
            name: &self.name,
            yesterday: &clock.date_string_offset(-1),
            previous_plan: previous.as_ref().map(|p| p.day.as_slice()),
            current_action: &self.current_action(),
            today: &clock.date_string(),
            replan: Some((reason.as_str(), next_hour)),
        });
        let text = self.services.ask(prompt).await?;
        *self.plan.write() = Some(Plan::from_daily(&text));
        self.plan_rest_of_hour(Some(reason)).await
    }
}

#[async_trait]
impl SimAgent for Persona {
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
        self.in_conversation.load(Ordering::Acquire)
    }

    fn set_in_conversation(&self, in_conversation: bool) {
        self.in_conversation.store(in_conversation, Ordering::Release);
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
        let location = self.location();
        let seen: Vec<String> = self
            .neighbours()
            .iter()
            .map(|a| format!("{} is {}", a.name(), a.current_action()))
            .chain(
                self.world
                    .map
                    .items_at(&location)
                    .into_iter()
                    .map(|i| format!("{} is {}", i.name, i.status)),
            )
            .collect();
        let context = if seen.is_empty() {
            format!("{location} is quiet; nobody else is here.")
        } else {
            format!("At {location}: {}.", seen.join(". "))
        };
        self.synthesize_observation(&context, MemoryKind::Observation).await
    }

    async fn plan_moment(&self) -> Result<()> {
        let clock = &self.world.clock;
        let observation = self
            .latest_observation()
            .unwrap_or_else(|| self.current_action());
        let mut seen = HashSet::new();
        let memories: Vec<String> = self
            .recall(
                std::slice::from_ref(&observation),
                self.services.limits.relevant_limit,
            )
            .await?
            .into_iter()
            .flatten()
            .filter(|m| seen.insert(m.clone()))
            .collect();

        let plan = self.plan().unwrap_or_default();
        let slot = plan
            .action_for_slot(clock.slot_in_hour())
            .unwrap_or("no plan")
            .to_string();
        let people: Vec<String> = self
            .neighbours()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        let location = self.location();
        let items = self.world.map.items_at(&location);

        let answer: prompts::MomentAnswer = self
            .services
            .ask_json(prompts::moment(&MomentPrompt {
                summary: &self.summary(),
                name: &self.name,
                granularity_minutes: clock.granularity_minutes(),
                previous_action: &self.current_action(),
                observation: &observation,
                memories: &memories,
                hour_plan: &plan.hour,
                slot_plan: &slot,
                people: &people,
                items: &items,
                now: &clock.date_time_string(),
            }))
            .await?;
        debug!(agent = %self.name, action = %answer.action, "planned moment");

        let partner = answer
            .talk_to
            .as_deref()
            .and_then(|p| self.neighbours().into_iter().find(|a| a.name() == p));
        if let Some(target) = partner {
            let started = self.world.conversations.start(self.this()?, target).await?;
            if started.is_some() {
                return Ok(());
            }
        }

        for update in &answer.items {
            if let Err(e) = self
                .world
                .map
                .set_item_status(&location, &update.item, &update.status)
            {
                debug!(agent = %self.name, error = %e, "ignoring item update");
            }
        }
        self.set_current_action(answer.action);
        match answer.replan_reason.filter(|r| !r.trim().is_empty()) {
            Some(reason) => self.replan_day(reason).await,
            None => Ok(()),
        }
    }

    async fn plan_place(&self) -> Result<()> {
        let location = self.location();
        let locations = self.world.map.location_names();
        let answer: prompts::PlaceAnswer = self
            .services
            .ask_json(prompts::place(
                &self.name,
                &location,
                &self.home,
                &locations,
                &self.current_action(),
            ))
            .await?;

        match locations.iter().find(|l| **l == answer.place) {
            Some(place) if *place != location => {
                debug!(agent = %self.name, from = %location, to = %place, "moving");
                self.set_location(place.clone());
            }
            Some(_) => {}
            None => debug!(agent = %self.name, place = %answer.place, "unknown place, staying"),
        }
        Ok(())
    }

    async fn reflect(&self) -> Result<()> {
        let limits = &self.services.limits;
        let recent = self
            .services
            .memory
            .most_recent(&self.name, limits.reflection_recent_limit)
            .await?;
        if recent.is_empty() {
            return Ok(());
        }
        let statements: Vec<String> = recent.into_iter().map(|r| r.text).collect();

        let answer: prompts::QuestionsAnswer = self
            .services
            .ask_json(prompts::reflection_questions(&statements))
            .await?;
        let questions: Vec<String> = answer.questions.into_iter().take(3).collect();
        if questions.is_empty() {
            return Err(SimError::MalformedResponse(
                "reflection produced no questions".into(),
            ));
        }

        let answers: Vec<String> = self
            .recall(&questions, limits.reflection_answer_limit)
            .await?
            .into_iter()
            .flatten()
            .collect();
        let insights = self
            .services
            .ask(prompts::insights(&self.name, &answers))
            .await?;
        info!(agent = %self.name, "reflected");
        self.remember(MemoryKind::Reflection, REFLECTION_IMPORTANCE, insights)
            .await
    }

    async fn plan_day(&self) -> Result<()> {
        let clock = &self.world.clock;
        let previous = self.plan();
        let prompt = prompts::day(&DayPrompt {
            summary: &self.summary(),
            circadian_rhythm: &self.circadian_rhythm,
            name: &self.name,
            yesterday: &clock.date_string_offset(-1),
            previous_plan: previous.as_ref().map(|p| p.day.as_slice()),
            current_action: &self.current_action(),
            today: &clock.date_string(),
            replan: None,
        });
        let text = self.services.ask(prompt).await?;
        let plan = Plan::from_daily(&text);
        info!(agent = %self.name, entries = plan.day.len(), "planned day");
        *self.plan.write() = Some(plan);
        Ok(())
    }

    async fn plan_rest_of_hour(&self, reason: Option<String>) -> Result<()> {
        let clock = &self.world.clock;
        let now = clock.now();
        let granularity = clock.granularity_minutes();
        let slots: Vec<String> = (0..60 / granularity)
            .map(|i| format!("{}:{:02}", now.hour(), i * granularity))
            .collect();

        let mut plan = self.plan().unwrap_or_default();
        let hour_entry = plan
            .entry_for_hour(now.hour())
            .unwrap_or("free time")
            .to_string();
        let answer: prompts::HourlyAnswer = self
            .services
            .ask_json(prompts::rest_of_hour(
                &self.summary(),
                &hour_entry,
                &clock.time_string(),
                &slots,
                reason.as_deref(),
            ))
            .await?;
        if answer.slots.is_empty() {
            return Err(SimError::MalformedResponse("empty hourly plan".into()));
        }

        debug!(agent = %self.name, slots = answer.slots.len(), "planned hour");
        plan.hour = answer.slots;
        *self.plan.write() = Some(plan);
        Ok(())
    }

    async fn synthesize_summary(&self) -> Result<()> {
        let limit = self.services.limits.summary_limit;
        let queries: Vec<String> = prompts::SUMMARY_ASPECTS
            .iter()
            .map(|aspect| prompts::summary_query(&self.name, aspect))
            .collect();
        let memories = self.recall(&queries, limit).await?;

        let aspects = try_join_all(prompts::SUMMARY_ASPECTS.iter().zip(&memories).map(
            |(aspect, statements)| {
                self.services
                    .ask(prompts::summary_aspect(&self.name, aspect, statements))
            },
        ))
        .await?;

        let summary = format!(
            "Name: {}; Age: {}; Traits: {}; {}",
            self.name,
            self.age,
            self.traits.join(", "),
            aspects.join("; ")
        );
        debug!(agent = %self.name, summary = %summary, "summarized");
        *self.summary.write() = summary;
        Ok(())
    }

    async fn reflect_over_conversation(&self, transcript: &str) -> Result<()> {
        self.synthesize_observation(transcript, MemoryKind::Conversation)
            .await
    }
}
