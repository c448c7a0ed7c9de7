//! # sim-core
//!
//! Core types, traits, and primitives for the simulacra agent simulation.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! the simulated clock, the agent operation contract, plans, the event bus, and the
//! unified error type.

pub mod action;
pub mod agent;
pub mod clock;
pub mod error;
pub mod event;
pub mod plan;

pub use action::{ActionLog, TracingActionLog};
pub use agent::{AgentRef, ImportanceAccumulator, SimAgent};
pub use clock::SimClock;
pub use error::{Result, SimError};
pub use event::{EventBus, SimEvent};
pub use plan::Plan;
