//! Task-complete tool - Authoritative completion signal for an agent run
//!
//! The orchestrator intercepts this call and ends the run with the
//! given summary. The execute body only runs if dispatch reaches it
//! directly, in which case it just echoes the summary back.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

pub struct TaskCompleteTool;

#[derive(Deserialize)]
pub struct TaskCompleteParams {
    pub summary: String,
}

#[async_trait]
impl Tool for TaskCompleteTool {
    fn name(&self) -> &str {
        "task_complete"
    }

    fn description(&self) -> &str {
        "Signal that the assigned task is complete. Call this with a summary of what was accomplished; no further turns will run."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Summary of the completed work"
                }
            },
            "required": ["summary"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<TaskCompleteParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        ToolResult::success_data(json!({
            "message": "Task marked complete",
            "summary": params.summary
        }))
    }
}
