//! # sim-config
//!
//! Configuration system for the simulation. Reads from `simulacra.toml` and
//! environment variables, in that precedence order, falling back to defaults.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::SimConfig;
pub use schema::{
    AgentSeed, ClockConfig, ConfigWarning, ConversationConfig, LoggingConfig, MemoryConfig,
    SchedulerConfig, ServicesConfig, WarningSeverity, WorldConfig,
    ItemConfig, LocationConfig,
};
