//! Built-in tool implementations.

pub mod edit;
pub mod list;
pub mod read;
pub mod run_command;
pub mod search;
pub mod spawn_agent;
pub mod task_complete;
pub mod write;

use std::sync::Arc;

use crate::tools::registry::ToolRegistry;

/// Register every built-in tool.
pub async fn register_builtin_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(read::ReadTool)).await;
    registry.register(Arc::new(list::ListTool)).await;
    registry.register(Arc::new(search::SearchTool)).await;
    registry.register(Arc::new(write::WriteTool)).await;
    registry.register(Arc::new(edit::EditTool)).await;
    registry
        .register(Arc::new(run_command::RunCommandTool))
        .await;
    registry
        .register(Arc::new(task_complete::TaskCompleteTool))
        .await;
    registry
        .register(Arc::new(spawn_agent::SpawnAgentTool))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_builtins_registered() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).await;

        for name in [
            "read",
            "list",
            "search",
            "write",
            "edit",
            "run_command",
            "task_complete",
            "spawn_agent",
        ] {
            assert!(registry.contains(name).await, "missing tool {}", name);
        }
    }
}
