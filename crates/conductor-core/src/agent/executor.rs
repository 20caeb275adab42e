//! Tool execution for agent runs.
//!
//! Handles:
//! - Approval gating per the configured approval level
//! - Dispatch to built-in tools, then namespaced provider tools
//! - Output truncation before results re-enter the conversation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::types::{Content, ToolCall};
use crate::approval::{self, ApprovalLevel};
use crate::providers::{format_tool_result, parse_provider_tool_name, ProviderManager};
use crate::tools::registry::{ToolContext, ToolRegistry, ToolResult};

use super::loop_events::LoopEvent;
use super::router::InputRouter;

const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;
const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything one run needs to dispatch tool calls.
pub(crate) struct ToolExecutor {
    pub tool_registry: Arc<ToolRegistry>,
    pub providers: Arc<ProviderManager>,
    pub approval_level: ApprovalLevel,
    pub working_dir: std::path::PathBuf,
    pub command_timeout: Duration,
}

impl ToolExecutor {
    /// Execute one tool call, going through the approval gate first.
    ///
    /// Always produces a `Content::ToolResult` so the conversation
    /// invariant (one result per call) holds even for denials and
    /// unknown tools.
    pub async fn execute(
        &self,
        call: &ToolCall,
        run_id: &str,
        cancel: &CancellationToken,
        event_tx: &mpsc::UnboundedSender<LoopEvent>,
        router: &Arc<InputRouter>,
    ) -> Content {
        let decision = approval::decide(self.approval_level, &call.name, &call.input);

        if decision.requires_approval {
            let _ = event_tx.send(LoopEvent::ToolApprovalRequired {
                run_id: run_id.to_string(),
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
                reason: decision.reason.clone(),
            });

            let approved = wait_for_approval(call, cancel, router).await;

            if !approved {
                let _ = event_tx.send(LoopEvent::ToolDenied {
                    run_id: run_id.to_string(),
                    id: call.id.clone(),
                });
                let output = "Tool execution denied by user".to_string();
                let _ = event_tx.send(LoopEvent::ToolResult {
                    run_id: run_id.to_string(),
                    id: call.id.clone(),
                    output: output.clone(),
                    is_error: true,
                });
                return tool_result_content(&call.id, output, true);
            }

            let _ = event_tx.send(LoopEvent::ToolApproved {
                run_id: run_id.to_string(),
                id: call.id.clone(),
            });
        }

        let _ = event_tx.send(LoopEvent::ToolExecuting {
            run_id: run_id.to_string(),
            id: call.id.clone(),
            name: call.name.clone(),
        });

        let result = self.dispatch(call, cancel).await;
        let output = truncate_output(&result.output);

        let _ = event_tx.send(LoopEvent::ToolResult {
            run_id: run_id.to_string(),
            id: call.id.clone(),
            output: output.clone(),
            is_error: result.is_error,
        });

        tool_result_content(&call.id, output, result.is_error)
    }

    /// Built-in names take precedence over the provider namespace.
    async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        if self.tool_registry.contains(&call.name).await {
            let mut ctx = ToolContext::new(self.working_dir.clone(), cancel.clone());
            if call.name == "run_command" {
                ctx.timeout = Some(self.command_timeout);
            }

            return self
                .tool_registry
                .execute(&call.name, call.input.clone(), &ctx)
                .await
                .unwrap_or_else(|| {
                    ToolResult::error_with_code(
                        "unknown_tool",
                        format!("Unknown tool: {}", call.name),
                    )
                });
        }

        if let Some((server, tool)) = parse_provider_tool_name(&call.name) {
            return match self.providers.call_tool(server, tool, call.input.clone()).await {
                Ok(result) => {
                    let formatted = format_tool_result(&result);
                    if result.is_error {
                        ToolResult::error_with_code("tool_error", formatted)
                    } else {
                        ToolResult::success(formatted)
                    }
                }
                Err(e) => ToolResult::error(format!("Provider call failed: {}", e)),
            };
        }

        ToolResult::error_with_code("unknown_tool", format!("Unknown tool: {}", call.name))
    }
}

/// Wait for an approval decision, bounded by a 5 minute deadline.
/// Cancellation and timeout both count as denial.
async fn wait_for_approval(
    call: &ToolCall,
    cancel: &CancellationToken,
    router: &Arc<InputRouter>,
) -> bool {
    let rx = router.subscribe(&call.id).await;

    tokio::select! {
        _ = cancel.cancelled() => {
            router.unsubscribe(&call.id).await;
            false
        }
        outcome = tokio::time::timeout(APPROVAL_TIMEOUT, rx) => match outcome {
            Ok(Ok(approved)) => approved,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!(tool = %call.name, id = %call.id, "approval timed out");
                router.unsubscribe(&call.id).await;
                false
            }
        },
    }
}

fn tool_result_content(tool_use_id: &str, output: String, is_error: bool) -> Content {
    Content::ToolResult {
        tool_use_id: tool_use_id.to_string(),
        output: serde_json::Value::String(output),
        is_error: if is_error { Some(true) } else { None },
    }
}

pub(crate) fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let truncated_len = floor_char_boundary(output, MAX_TOOL_OUTPUT_CHARS);
    let truncated = &output[..truncated_len];
    let break_point = truncated.rfind('\n').unwrap_or(truncated_len);
    let clean = &output[..break_point];
    format!(
        "{}\n\n[... OUTPUT TRUNCATED: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::config::UserProviderStore;
    use crate::tools::register_builtin_tools;
    use serde_json::json;

    fn executor(dir: &std::path::Path, level: ApprovalLevel) -> ToolExecutor {
        ToolExecutor {
            tool_registry: Arc::new(ToolRegistry::new()),
            providers: Arc::new(ProviderManager::new(
                Vec::new(),
                UserProviderStore::new(dir.join("providers.json")),
                dir.to_path_buf(),
            )),
            approval_level: level,
            working_dir: dir.to_path_buf(),
            command_timeout: Duration::from_secs(10),
        }
    }

    fn call(name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("tc-{}", name),
            name: name.to_string(),
            input,
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path(), ApprovalLevel::High);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let router = InputRouter::new(cancel.clone());

        let content = exec
            .execute(&call("no_such_tool", json!({})), "run-1", &cancel, &event_tx, &router)
            .await;

        let Content::ToolResult {
            tool_use_id,
            is_error,
            ..
        } = content
        else {
            panic!("expected tool result");
        };
        assert_eq!(tool_use_id, "tc-no_such_tool");
        assert_eq!(is_error, Some(true));
    }

    #[tokio::test]
    async fn test_read_only_tool_runs_without_approval_at_low() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "data\n").unwrap();

        let mut exec = executor(dir.path(), ApprovalLevel::Low);
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).await;
        exec.tool_registry = Arc::new(registry);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let router = InputRouter::new(cancel.clone());

        let content = exec
            .execute(
                &call("read", json!({"file_path": "f.txt"})),
                "run-1",
                &cancel,
                &event_tx,
                &router,
            )
            .await;

        let Content::ToolResult { is_error, .. } = content else {
            panic!("expected tool result");
        };
        assert_eq!(is_error, None);

        // No approval events should have been emitted.
        while let Ok(event) = event_rx.try_recv() {
            assert!(!matches!(event, LoopEvent::ToolApprovalRequired { .. }));
        }
    }

    #[tokio::test]
    async fn test_gated_tool_waits_for_approval_then_executes() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path(), ApprovalLevel::Off);
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).await;
        exec.tool_registry = Arc::new(registry);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let router = InputRouter::new(cancel.clone());
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        router.spawn_pump(input_rx);

        // Approve as soon as the request event shows up.
        let approve_tx = input_tx.clone();
        tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Some(LoopEvent::ToolApprovalRequired { id, .. }) => {
                        let _ = approve_tx.send(super::super::loop_events::LoopInput::ToolApproval {
                            tool_call_id: id,
                            approved: true,
                        });
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
        });

        let content = exec
            .execute(
                &call("write", json!({"file_path": "out.txt", "content": "x\n"})),
                "run-1",
                &cancel,
                &event_tx,
                &router,
            )
            .await;

        let Content::ToolResult { is_error, .. } = content else {
            panic!("expected tool result");
        };
        assert_eq!(is_error, None);
        assert!(dir.path().join("out.txt").exists());
    }

    #[tokio::test]
    async fn test_denied_tool_returns_error_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path(), ApprovalLevel::Off);
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).await;
        exec.tool_registry = Arc::new(registry);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let router = InputRouter::new(cancel.clone());
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        router.spawn_pump(input_rx);

        let deny_tx = input_tx.clone();
        tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Some(LoopEvent::ToolApprovalRequired { id, .. }) => {
                        let _ = deny_tx.send(super::super::loop_events::LoopInput::ToolApproval {
                            tool_call_id: id,
                            approved: false,
                        });
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
        });

        let content = exec
            .execute(
                &call("write", json!({"file_path": "out.txt", "content": "x\n"})),
                "run-1",
                &cancel,
                &event_tx,
                &router,
            )
            .await;

        let Content::ToolResult { is_error, .. } = content else {
            panic!("expected tool result");
        };
        assert_eq!(is_error, Some(true));
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_truncate_output_preserves_char_boundaries() {
        let output = "é".repeat(MAX_TOOL_OUTPUT_CHARS);
        let truncated = truncate_output(&output);
        assert!(truncated.contains("OUTPUT TRUNCATED"));
    }

    #[test]
    fn test_truncate_output_short_passthrough() {
        assert_eq!(truncate_output("short"), "short");
    }
}
