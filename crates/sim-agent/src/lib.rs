//! # sim-agent
//!
//! Personas whose every decision is delegated to a chat model, grounded in a
//! memory stream they write to and read from.
//!
//! - [`Persona`] implements the engine's agent contract.
//! - [`LlmDialogue`] opens conversations between personas, one turn taker per
//!   conversation.
//! - [`Population`] builds personas from configured seeds and registers them.

pub mod dialogue;
pub mod persona;
pub mod population;
mod prompts;

pub use dialogue::{LlmDialogue, LlmTurnTaker};
pub use persona::{Persona, PersonaServices, World};
pub use population::{PersonaDirectory, Population};
