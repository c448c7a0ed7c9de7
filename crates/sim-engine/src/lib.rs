//! # sim-engine
//!
//! The simulation engine: the fixed-rate tick scheduler, moment dispatch, the
//! retry-batch pipeline, the agent and conversation registries, the world map
//! of locations and items, and the conversation loop.
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────┐   every tick_period
//!        │ SimScheduler │◄──────────────────── interval (fixed rate)
//!        └──────┬───────┘
//!               │ 1. classify moment
//!               │ 2. group agents by location
//!      ┌────────┼────────┐
//!      ▼        ▼        ▼                    one task per location
//!  ┌───────┐┌───────┐┌───────┐
//!  │ group ││ group ││ group │  Moment::elapse → Pipeline / RetryBatch
//!  └───┬───┘└───┬───┘└───┬───┘
//!      └────────┼────────┘
//!               │ 3. advance clock (Reactive only)
//!               │ 4. drain DeferredQueue
//!               │ 5. errors → ErrorChannel
//!               ▼
//!        ┌──────────────┐  plan_moment may   ┌──────────────────────┐
//!        │    agents    │───────────────────►│ ConversationRegistry │
//!        └──────────────┘  start a talk      └──────────┬───────────┘
//!                                                       │ wait / notify
//!                                                       ▼
//!                                            ┌──────────────────────┐
//!                                            │   ConversationLoop   │
//!                                            └──────────────────────┘
//! ```

pub mod batch;
pub mod conversation;
pub mod moment;
pub mod registry;
pub mod scheduler;
pub mod simulation;
pub mod world;

pub use batch::{BatchOutcome, Failure, Pass, Pipeline, RetryBatch, Stage};
pub use conversation::{
    Conversation, ConversationLoop, ConversationRegistry, Dialogue, Turn, TurnTaker,
};
pub use moment::{Moment, MomentClassifier, MomentContext, MomentReport};
pub use registry::AgentRegistry;
pub use scheduler::{DeferredQueue, ErrorChannel, Mutation, SimHandle, SimScheduler, TickReport};
pub use simulation::{RunSummary, RunningSimulation, Simulation, SimulationBuilder};
pub use world::{Item, WorldMap};
