//! # sim-cli
//!
//! Command-line interface for the simulacra agent simulation.
//!
//! ## Commands
//!
//! - `simulacra run`: Run the simulation until Ctrl-C, a tick limit, or a fatal error
//! - `simulacra config`: Show the effective configuration
//! - `simulacra init`: Write a default `simulacra.toml`
//! - `simulacra completions`: Generate shell completions
//! - `simulacra version`: Show version and build info

pub mod commands;

pub use commands::Cli;
