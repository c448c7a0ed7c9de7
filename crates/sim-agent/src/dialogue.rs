use std::sync::Arc;

use async_trait::async_trait;
use sim_core::{AgentRef, Result, SimAgent, SimError};
use sim_engine::{Dialogue, Turn, TurnTaker};
use tracing::debug;

use crate::persona::Persona;
use crate::population::PersonaDirectory;
use crate::prompts::{self, TurnPrompt};

/// Opens conversations between personas registered in a [`PersonaDirectory`].
pub struct LlmDialogue {
    personas: Arc<PersonaDirectory>,
}

impl LlmDialogue {
    pub fn new(personas: Arc<PersonaDirectory>) -> Self {
        Self { personas }
    }

    fn persona(&self, agent: &AgentRef) -> Result<Arc<Persona>> {
        self.personas.get(agent.name()).ok_or_else(|| {
            SimError::Conversation(format!("{} is not a persona", agent.name()))
        })
    }
}

#[async_trait]
impl Dialogue for LlmDialogue {
    async fn open(&self, instigator: &AgentRef, target: &AgentRef) -> Result<Box<dyn TurnTaker>> {
        let instigator = self.persona(instigator)?;
        let target = self.persona(target)?;
        let (instigator_context, target_context) = tokio::try_join!(
            context_about(&instigator, target.name()),
            context_about(&target, instigator.name()),
        )?;

        let opening = instigator
            .latest_observation()
            .unwrap_or_else(|| format!("{} sees {}", instigator.name(), target.name()));
        let greeting = format!(
            "{} is starting a conversation with {}",
            instigator.name(),
            target.name()
        );

        Ok(Box::new(LlmTurnTaker {
            sides: [
                Side {
                    persona: instigator,
                    opening,
                    context: instigator_context,
                },
                Side {
                    persona: target,
                    opening: greeting,
                    context: target_context,
                },
            ],
        }))
    }
}

/// Summarize what `persona` remembers about `other` into conversation context.
async fn context_about(persona: &Persona, other: &str) -> Result<String> {
    let limit = persona.services().limits.conversation_context_limit;
    let memories = persona
        .recall(&[other.to_string()], limit)
        .await?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    persona
        .services()
        .ask(prompts::conversation_context(
            persona.name(),
            &persona.summary(),
            other,
            &memories,
        ))
        .await
}

struct Side {
    persona: Arc<Persona>,
    opening: String,
    context: String,
}

/// One conversation's worth of context for each participant. The summary and
/// time are read at every turn; the memory context is fixed when it opens.
pub struct LlmTurnTaker {
    sides: [Side; 2],
}

#[async_trait]
impl TurnTaker for LlmTurnTaker {
    async fn take_turn(
        &self,
        speaker: &AgentRef,
        listener: &AgentRef,
        transcript: &str,
    ) -> Result<Turn> {
        let side = self
            .sides
            .iter()
            .find(|s| s.persona.name() == speaker.name())
            .ok_or_else(|| {
                SimError::Conversation(format!("{} is not part of this conversation", speaker.name()))
            })?;
        let persona = &side.persona;

        let prompt = prompts::turn(&TurnPrompt {
            summary: &persona.summary(),
            now: &persona.clock().time_string(),
            opening: &side.opening,
            other: listener.name(),
            context: &side.context,
            speaker: persona.name(),
            transcript,
        });
        let answer: prompts::TurnAnswer = persona.services().ask_json(prompt).await?;
        debug!(speaker = %speaker.name(), should_end = answer.should_end, "turn taken");
        Ok(Turn {
            text: answer.response.trim().to_string(),
            should_end: answer.should_end,
        })
    }
}
