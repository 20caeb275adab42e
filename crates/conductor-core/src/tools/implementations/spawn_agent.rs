//! Spawn-agent tool - Request a child agent run
//!
//! The orchestrator intercepts this call, validates the requested
//! agent against the caller's spawn allowlist, and runs the child
//! itself. Reaching the execute body means the call was dispatched
//! outside an agent run, which is an error.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::Tool;
use crate::tools::{ToolContext, ToolResult};

pub struct SpawnAgentTool;

#[derive(Deserialize)]
pub struct SpawnAgentParams {
    pub agent_type: String,
    pub prompt: String,
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn a child agent to handle a subtask. The child runs to completion and its result is returned as this tool's output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_type": {
                    "type": "string",
                    "description": "The id of the agent type to spawn"
                },
                "prompt": {
                    "type": "string",
                    "description": "The task prompt for the child agent"
                }
            },
            "required": ["agent_type", "prompt"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::error_with_code(
            "tool_error",
            "spawn_agent can only be invoked from within an agent run",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_dispatch_is_an_error() {
        let ctx = ToolContext::default();
        let result = SpawnAgentTool
            .execute(json!({"agent_type": "execution", "prompt": "x"}), &ctx)
            .await;
        assert!(result.is_error);
    }
}
