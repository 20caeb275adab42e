//! Conductor core - agent orchestration and tool-execution pipeline.
//!
//! The core turns a natural-language task into tool-mediated actions
//! against a local workspace through a tree of specialized sub-agents.
//! Front ends (CLI, server) consume the channel-based `LoopEvent` stream
//! emitted by [`agent::Orchestrator`] and feed `LoopInput`s back for
//! approvals and cancellation; the core never depends on a rendering
//! layer.

pub mod agent;
pub mod ai;
pub mod approval;
pub mod config;
pub mod providers;
pub mod tools;

pub use agent::{Orchestrator, OrchestratorConfig, OrchestratorServices};
pub use approval::ApprovalLevel;
pub use config::Config;
