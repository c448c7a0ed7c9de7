use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sim_config::AgentSeed;
use sim_core::{AgentRef, Result, SimAgent};
use sim_memory::{MemoryKind, MemoryRecord};
use tracing::info;

use crate::dialogue::LlmDialogue;
use crate::persona::{Persona, PersonaServices, World};

/// Importance of the statements an agent starts out remembering.
const SEED_MEMORY_IMPORTANCE: u8 = 5;

/// Personas by name, for collaborators that need more than the agent contract.
#[derive(Default)]
pub struct PersonaDirectory {
    personas: RwLock<HashMap<String, Arc<Persona>>>,
}

impl PersonaDirectory {
    pub fn insert(&self, persona: Arc<Persona>) {
        self.personas
            .write()
            .insert(persona.name().to_string(), persona);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Persona>> {
        self.personas.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.personas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.read().is_empty()
    }
}

/// Builds personas from configured seeds.
///
/// The dialogue must exist before the simulation builder, and the personas
/// need the builder's registries, so the population hands out its dialogue
/// first and spawns personas later.
pub struct Population {
    services: Arc<PersonaServices>,
    directory: Arc<PersonaDirectory>,
}

impl Population {
    pub fn new(services: PersonaServices) -> Self {
        Self {
            services: Arc::new(services),
            directory: Arc::new(PersonaDirectory::default()),
        }
    }

    pub fn dialogue(&self) -> Arc<LlmDialogue> {
        Arc::new(LlmDialogue::new(Arc::clone(&self.directory)))
    }

    pub fn directory(&self) -> &Arc<PersonaDirectory> {
        &self.directory
    }

    /// Create, seed, and register one persona per seed.
    pub async fn spawn(&self, seeds: &[AgentSeed], world: &World) -> Result<Vec<Arc<Persona>>> {
        let mut spawned = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let persona = Persona::new(seed, Arc::clone(&self.services), world.clone());
            self.seed_memories(seed, world).await?;

            world.agents.register(Arc::clone(&persona) as AgentRef)?;
            self.directory.insert(Arc::clone(&persona));
            info!(
                agent = %seed.name,
                home = %seed.home,
                memories = seed.memories.len(),
                "spawned persona"
            );
            spawned.push(persona);
        }
        Ok(spawned)
    }

    async fn seed_memories(&self, seed: &AgentSeed, world: &World) -> Result<()> {
        if seed.memories.is_empty() {
            return Ok(());
        }
        let texts: Vec<&str> = seed.memories.iter().map(String::as_str).collect();
        let embeddings = self.services.embed(&texts).await?;
        let now = world.clock.elapsed_hours();
        let records = seed
            .memories
            .iter()
            .zip(embeddings)
            .map(|(text, embedding)| {
                MemoryRecord::new(
                    &seed.name,
                    now,
                    SEED_MEMORY_IMPORTANCE,
                    MemoryKind::Observation,
                    text.as_str(),
                    embedding,
                )
            })
            .collect();
        self.services.memory.save_all(&seed.name, records).await
    }
}
