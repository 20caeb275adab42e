//! The agentic loop: phase orchestration, agent runs, streaming turn
//! assembly, approval routing, and tool dispatch.

mod executor;
pub mod loop_events;
pub mod orchestrator;
pub mod registry;
mod router;
mod stream;
pub mod turn;

pub use loop_events::{LoopEvent, LoopInput};
pub use orchestrator::{
    AgentRunResult, Orchestrator, OrchestratorConfig, OrchestratorServices, RunStatus,
};
pub use registry::{AgentDefinition, AgentRegistry, RegistryError};
pub use turn::{Turn, TurnBlock};
