//! Phase orchestrator — the top-level control loop.
//!
//! `Orchestrator` turns a user task into a sequence of phases
//! (prediction → intelligence → synthesis → execution), spawning agent
//! runs per phase and feeding each run's turns through the stream
//! parser → approval gate → tool dispatch loop until the run signals
//! completion or exhausts its turn budget.
//!
//! Front ends are thin presentation layers that:
//! - Create an orchestrator from their own state
//! - Call `run()` to get an event stream and input channel
//! - Map `LoopEvent` to their display format
//! - Send `LoopInput` for approvals and cancellation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ai::client::ModelClient;
use crate::ai::types::{Content, ModelMessage, Role, ToolCall, ToolDefinition};
use crate::approval::ApprovalLevel;
use crate::config::Config;
use crate::providers::ProviderManager;
use crate::tools::registry::ToolRegistry;

use super::executor::ToolExecutor;
use super::loop_events::{LoopEvent, LoopInput};
use super::registry::AgentRegistry;
use super::router::InputRouter;
use super::stream;
use super::turn::TurnBlock;

/// Maximum intelligence runs fanned out from one prediction.
const MAX_INTELLIGENCE_RUNS: usize = 3;

/// Configuration for one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub working_dir: PathBuf,
    pub approval_level: ApprovalLevel,
    pub max_turns: u32,
    pub max_spawn_depth: u32,
    pub phase_budget: Duration,
    pub command_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            working_dir: config.working_dir.clone(),
            approval_level: config.approval_level,
            max_turns: config.max_turns,
            max_spawn_depth: config.max_spawn_depth,
            phase_budget: Duration::from_secs(config.phase_budget_secs),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

/// Shared services the orchestrator needs.
pub struct OrchestratorServices {
    pub model_client: Arc<dyn ModelClient>,
    pub tool_registry: Arc<ToolRegistry>,
    pub agent_registry: Arc<AgentRegistry>,
    pub providers: Arc<ProviderManager>,
}

/// How one agent run settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    Error,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

/// Settled result of one agent run.
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub run_id: String,
    pub agent_id: String,
    pub status: RunStatus,
    pub output: String,
}

/// Shared context threaded through every run in one orchestration.
struct RunCtx {
    model_client: Arc<dyn ModelClient>,
    agent_registry: Arc<AgentRegistry>,
    executor: ToolExecutor,
    event_tx: mpsc::UnboundedSender<LoopEvent>,
    router: Arc<InputRouter>,
    max_turns: u32,
    max_spawn_depth: u32,
    phase_budget: Duration,
}

/// The phase orchestrator.
pub struct Orchestrator {
    services: OrchestratorServices,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(services: OrchestratorServices, config: OrchestratorConfig) -> Self {
        Self { services, config }
    }

    /// Start the orchestration.
    ///
    /// Returns `(event_receiver, input_sender)`. The loop runs as a
    /// spawned tokio task, emitting `LoopEvent`s for every state
    /// change; the caller sends `LoopInput`s for approvals and
    /// cancellation.
    pub fn run(
        self,
        task: String,
    ) -> (
        mpsc::UnboundedReceiver<LoopEvent>,
        mpsc::UnboundedSender<LoopInput>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            self.run_inner(task, event_tx, input_rx).await;
        });

        (event_rx, input_tx)
    }

    async fn run_inner(
        self,
        task: String,
        event_tx: mpsc::UnboundedSender<LoopEvent>,
        input_rx: mpsc::UnboundedReceiver<LoopInput>,
    ) {
        let cancel = CancellationToken::new();
        let router = InputRouter::new(cancel.clone());
        router.spawn_pump(input_rx);

        let ctx = Arc::new(RunCtx {
            model_client: self.services.model_client,
            agent_registry: self.services.agent_registry,
            executor: ToolExecutor {
                tool_registry: self.services.tool_registry,
                providers: self.services.providers,
                approval_level: self.config.approval_level,
                working_dir: self.config.working_dir.clone(),
                command_timeout: self.config.command_timeout,
            },
            event_tx: event_tx.clone(),
            router,
            max_turns: self.config.max_turns,
            max_spawn_depth: self.config.max_spawn_depth,
            phase_budget: self.config.phase_budget,
        });

        // ── Phase 1: prediction ────────────────────────────────────
        let prediction = run_phase_single(&ctx, "prediction", task.clone(), &cancel).await;
        if cancel.is_cancelled() {
            finish(&event_tx, prediction.output);
            return;
        }

        // ── Phase 2: intelligence (fan-out) ────────────────────────
        let focus_prompts = intelligence_prompts(&task, &prediction);
        emit_phase_started(&event_tx, "intelligence");
        let findings = run_phase_concurrent(&ctx, "intelligence", focus_prompts, &cancel).await;
        emit_phase_completed(&event_tx, "intelligence");
        if cancel.is_cancelled() {
            finish(&event_tx, combine_findings(&findings));
            return;
        }

        // ── Phase 3: synthesis ─────────────────────────────────────
        let synthesis_prompt = format!(
            "Task:\n{}\n\nFindings:\n{}",
            task,
            combine_findings(&findings)
        );
        let synthesis = run_phase_single(&ctx, "synthesis", synthesis_prompt, &cancel).await;
        if cancel.is_cancelled() {
            finish(&event_tx, synthesis.output);
            return;
        }

        // ── Phase 4: execution ─────────────────────────────────────
        let execution_prompt = format!("Task:\n{}\n\nPlan:\n{}", task, synthesis.output);
        let execution = run_phase_single(&ctx, "execution", execution_prompt, &cancel).await;

        finish(&event_tx, execution.output);
    }
}

fn finish(event_tx: &mpsc::UnboundedSender<LoopEvent>, output: String) {
    let _ = event_tx.send(LoopEvent::Finished { output });
}

fn emit_phase_started(event_tx: &mpsc::UnboundedSender<LoopEvent>, phase: &str) {
    let _ = event_tx.send(LoopEvent::PhaseStarted {
        phase: phase.to_string(),
    });
}

fn emit_phase_completed(event_tx: &mpsc::UnboundedSender<LoopEvent>, phase: &str) {
    let _ = event_tx.send(LoopEvent::PhaseCompleted {
        phase: phase.to_string(),
    });
}

/// Run a single-agent phase.
async fn run_phase_single(
    ctx: &Arc<RunCtx>,
    agent_id: &str,
    prompt: String,
    cancel: &CancellationToken,
) -> AgentRunResult {
    emit_phase_started(&ctx.event_tx, agent_id);
    let result = run_agent(
        Arc::clone(ctx),
        agent_id.to_string(),
        prompt,
        0,
        None,
        cancel.clone(),
    )
    .await;
    emit_phase_completed(&ctx.event_tx, agent_id);
    result
}

/// Focus prompts for the intelligence fan-out: one per `- ` line of the
/// prediction output, capped, falling back to the whole task.
fn intelligence_prompts(task: &str, prediction: &AgentRunResult) -> Vec<String> {
    let focus_lines: Vec<&str> = prediction
        .output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("- "))
        .take(MAX_INTELLIGENCE_RUNS)
        .collect();

    if prediction.status != RunStatus::Complete || focus_lines.is_empty() {
        return vec![format!("Task:\n{}", task)];
    }

    focus_lines
        .into_iter()
        .map(|focus| format!("Task:\n{}\n\nFocus area:\n{}", task, &focus[2..]))
        .collect()
}

fn combine_findings(findings: &[AgentRunResult]) -> String {
    findings
        .iter()
        .map(|result| match result.status {
            RunStatus::Complete => result.output.clone(),
            RunStatus::Error => format!("[agent error: {}]", result.output),
            RunStatus::Aborted => "[agent aborted]".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Launch one run per prompt concurrently and join with all-settled
/// semantics under the phase budget. A failing run never cancels its
/// siblings; runs that miss the deadline are cancelled and recorded as
/// aborted.
async fn run_phase_concurrent(
    ctx: &Arc<RunCtx>,
    agent_id: &str,
    prompts: Vec<String>,
    cancel: &CancellationToken,
) -> Vec<AgentRunResult> {
    let phase_cancel = cancel.child_token();
    let deadline = tokio::time::Instant::now() + ctx.phase_budget;

    let mut join_set = JoinSet::new();
    for prompt in prompts {
        join_set.spawn(run_agent(
            Arc::clone(ctx),
            agent_id.to_string(),
            prompt,
            0,
            None,
            phase_cancel.clone(),
        ));
    }

    let mut results = Vec::new();
    let mut deadline_hit = false;

    loop {
        let joined = if deadline_hit {
            join_set.join_next().await
        } else {
            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(agent_id, "phase budget exhausted, cancelling remaining runs");
                    phase_cancel.cancel();
                    deadline_hit = true;
                    continue;
                }
            }
        };

        match joined {
            Some(Ok(result)) => results.push(result),
            Some(Err(e)) => {
                // A panicked run settles as an error entry.
                results.push(AgentRunResult {
                    run_id: String::new(),
                    agent_id: agent_id.to_string(),
                    status: RunStatus::Error,
                    output: format!("run task failed: {}", e),
                });
            }
            None => break,
        }
    }

    results
}

/// Run one agent to completion: the turn loop of model call → stream
/// parse → tool dispatch → feed results back.
///
/// Boxed because spawn requests recurse into child runs.
fn run_agent(
    ctx: Arc<RunCtx>,
    agent_id: String,
    prompt: String,
    depth: u32,
    parent_run_id: Option<String>,
    cancel: CancellationToken,
) -> BoxFuture<'static, AgentRunResult> {
    Box::pin(async move {
        let run_id = uuid::Uuid::new_v4().to_string();

        let error_result = |output: String| AgentRunResult {
            run_id: run_id.clone(),
            agent_id: agent_id.clone(),
            status: RunStatus::Error,
            output,
        };

        let Some(definition) = ctx.agent_registry.get(&agent_id).cloned() else {
            return error_result(format!("Unknown agent type: {}", agent_id));
        };

        let _ = ctx.event_tx.send(LoopEvent::RunStarted {
            run_id: run_id.clone(),
            agent_id: agent_id.clone(),
            parent_run_id,
        });
        info!(run_id, agent_id, depth, "agent run started");

        let tools = agent_tools(&ctx, &definition).await;
        let mut conversation = vec![ModelMessage::user_text(prompt)];

        let mut settled = error_result(format!(
            "Turn budget of {} exhausted without completion",
            ctx.max_turns
        ));

        'turns: for turn_no in 1..=ctx.max_turns {
            if cancel.is_cancelled() {
                settled.status = RunStatus::Aborted;
                settled.output = "Run cancelled".to_string();
                break;
            }

            let stream_rx = match ctx
                .model_client
                .stream_turn(&definition.system_prompt, &conversation, &tools)
                .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    settled.output = format!("Model error: {}", e);
                    break;
                }
            };

            let turn = stream::parse_turn(stream_rx, &cancel, &ctx.event_tx, &run_id).await;

            if turn.incomplete {
                if cancel.is_cancelled() {
                    settled.status = RunStatus::Aborted;
                    settled.output = "Run cancelled".to_string();
                } else {
                    settled.output = "Model stream ended before the turn completed".to_string();
                }
                break;
            }

            let turn_text = turn.text();
            let tool_calls: Vec<ToolCall> =
                turn.tool_calls().into_iter().cloned().collect();

            let assistant_content: Vec<Content> = turn
                .blocks
                .iter()
                .map(|block| match block {
                    TurnBlock::Text(text) => Content::Text { text: text.clone() },
                    TurnBlock::ToolUse(call) => Content::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                    },
                })
                .collect();
            if !assistant_content.is_empty() {
                conversation.push(ModelMessage {
                    role: Role::Assistant,
                    content: assistant_content,
                });
            }

            // Zero tool calls ends the run with the accumulated text.
            if tool_calls.is_empty() {
                let _ = ctx.event_tx.send(LoopEvent::TurnComplete {
                    run_id: run_id.clone(),
                    turn: turn_no,
                    has_more: false,
                });
                settled.status = RunStatus::Complete;
                settled.output = turn_text;
                break;
            }

            // A task_complete call is the authoritative completion
            // signal for agents allowed to use it, overriding the
            // default rule and any sibling calls in the same turn.
            if definition.allows_tool("task_complete") {
                if let Some(call) = tool_calls.iter().find(|c| c.name == "task_complete") {
                    let summary = call
                        .input
                        .get("summary")
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                        .unwrap_or(turn_text);

                    let _ = ctx.event_tx.send(LoopEvent::ToolResult {
                        run_id: run_id.clone(),
                        id: call.id.clone(),
                        output: summary.clone(),
                        is_error: false,
                    });
                    let _ = ctx.event_tx.send(LoopEvent::TurnComplete {
                        run_id: run_id.clone(),
                        turn: turn_no,
                        has_more: false,
                    });

                    settled.status = RunStatus::Complete;
                    settled.output = summary;
                    break;
                }
            }

            // Dispatch every call in order; one result per call.
            let mut results: Vec<Content> = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                if !definition.allows_tool(&call.name) {
                    let output = format!(
                        "Tool '{}' is not available to agent '{}'",
                        call.name, agent_id
                    );
                    let _ = ctx.event_tx.send(LoopEvent::ToolResult {
                        run_id: run_id.clone(),
                        id: call.id.clone(),
                        output: output.clone(),
                        is_error: true,
                    });
                    results.push(Content::ToolResult {
                        tool_use_id: call.id.clone(),
                        output: serde_json::Value::String(output),
                        is_error: Some(true),
                    });
                    continue;
                }

                if call.name == "spawn_agent" {
                    match handle_spawn(&ctx, &definition, call, depth, &run_id, &cancel).await
                    {
                        SpawnOutcome::Result(content) => results.push(content),
                        SpawnOutcome::Violation(message) => {
                            // Spawn-hierarchy violation is fatal for
                            // this run, not for the orchestrator.
                            let _ = ctx.event_tx.send(LoopEvent::ToolResult {
                                run_id: run_id.clone(),
                                id: call.id.clone(),
                                output: message.clone(),
                                is_error: true,
                            });
                            settled.output = message;
                            break 'turns;
                        }
                    }
                    continue;
                }

                let content = ctx
                    .executor
                    .execute(call, &run_id, &cancel, &ctx.event_tx, &ctx.router)
                    .await;
                results.push(content);
            }

            conversation.push(ModelMessage {
                role: Role::User,
                content: results,
            });

            let _ = ctx.event_tx.send(LoopEvent::TurnComplete {
                run_id: run_id.clone(),
                turn: turn_no,
                has_more: true,
            });
        }

        let _ = ctx.event_tx.send(LoopEvent::RunCompleted {
            run_id: settled.run_id.clone(),
            agent_id: settled.agent_id.clone(),
            status: settled.status.as_str().to_string(),
            result: settled.output.clone(),
        });
        info!(
            run_id = %settled.run_id,
            agent_id = %settled.agent_id,
            status = settled.status.as_str(),
            "agent run settled"
        );

        settled
    })
}

enum SpawnOutcome {
    /// A tool result to feed back into the conversation.
    Result(Content),
    /// Hierarchy violation; the offending run terminates.
    Violation(String),
}

async fn handle_spawn(
    ctx: &Arc<RunCtx>,
    definition: &super::registry::AgentDefinition,
    call: &ToolCall,
    depth: u32,
    run_id: &str,
    cancel: &CancellationToken,
) -> SpawnOutcome {
    let error_content = |message: String| {
        Content::ToolResult {
            tool_use_id: call.id.clone(),
            output: serde_json::Value::String(message),
            is_error: Some(true),
        }
    };

    let (agent_type, prompt) = match (
        call.input.get("agent_type").and_then(|v| v.as_str()),
        call.input.get("prompt").and_then(|v| v.as_str()),
    ) {
        (Some(agent_type), Some(prompt)) => (agent_type.to_string(), prompt.to_string()),
        _ => {
            return SpawnOutcome::Result(error_content(
                "Invalid spawn request: 'agent_type' and 'prompt' are required".to_string(),
            ));
        }
    };

    if !definition.can_spawn(&agent_type) {
        return SpawnOutcome::Violation(format!(
            "Agent '{}' may not spawn '{}' (allowed: {:?})",
            definition.id, agent_type, definition.spawnable_agents
        ));
    }

    if depth + 1 > ctx.max_spawn_depth {
        return SpawnOutcome::Result(error_content(format!(
            "Spawn depth limit of {} reached",
            ctx.max_spawn_depth
        )));
    }

    let child = run_agent(
        Arc::clone(ctx),
        agent_type,
        prompt,
        depth + 1,
        Some(run_id.to_string()),
        cancel.clone(),
    )
    .await;

    let is_error = child.status != RunStatus::Complete;
    let output = if is_error {
        format!("Child run {}: {}", child.status.as_str(), child.output)
    } else {
        child.output
    };

    let _ = ctx.event_tx.send(LoopEvent::ToolResult {
        run_id: run_id.to_string(),
        id: call.id.clone(),
        output: output.clone(),
        is_error,
    });

    SpawnOutcome::Result(Content::ToolResult {
        tool_use_id: call.id.clone(),
        output: serde_json::Value::String(output),
        is_error: if is_error { Some(true) } else { None },
    })
}

/// The tool definitions advertised to one agent's model turns.
async fn agent_tools(ctx: &Arc<RunCtx>, definition: &super::registry::AgentDefinition) -> Vec<ToolDefinition> {
    let mut tools = ctx
        .executor
        .tool_registry
        .definitions_for(&definition.tool_names)
        .await;

    if definition.use_provider_tools {
        tools.extend(ctx.executor.providers.tool_definitions().await);
    }

    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::streaming::StreamEvent;
    use crate::providers::config::UserProviderStore;
    use crate::tools::register_builtin_tools;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Scripted model client: each call pops the next event sequence.
    struct ScriptedClient {
        scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    }

    impl ScriptedClient {
        fn new(scripts: Vec<Vec<StreamEvent>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn stream_turn(
            &self,
            _system_prompt: &str,
            _messages: &[ModelMessage],
            _tools: &[ToolDefinition],
        ) -> anyhow::Result<mpsc::UnboundedReceiver<StreamEvent>> {
            let script = self
                .scripts
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted response left"))?;

            let (tx, rx) = mpsc::unbounded_channel();
            for event in script {
                let _ = tx.send(event);
            }
            Ok(rx)
        }
    }

    fn text_turn(text: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::TextDelta {
                delta: text.to_string(),
            },
            StreamEvent::TurnStop,
        ]
    }

    fn tool_turn(id: &str, name: &str, input: serde_json::Value) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ToolBlockStart {
                id: id.to_string(),
                name: name.to_string(),
            },
            StreamEvent::ToolInputDelta {
                fragment: input.to_string(),
            },
            StreamEvent::ToolBlockStop,
            StreamEvent::TurnStop,
        ]
    }

    async fn orchestrator_with(
        dir: &std::path::Path,
        client: Arc<dyn ModelClient>,
    ) -> Orchestrator {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).await;

        let services = OrchestratorServices {
            model_client: client,
            tool_registry: Arc::new(registry),
            agent_registry: Arc::new(AgentRegistry::builtin()),
            providers: Arc::new(ProviderManager::new(
                Vec::new(),
                UserProviderStore::new(dir.join("providers.json")),
                dir.to_path_buf(),
            )),
        };

        let config = OrchestratorConfig {
            working_dir: dir.to_path_buf(),
            approval_level: ApprovalLevel::High,
            max_turns: 5,
            max_spawn_depth: 3,
            phase_budget: Duration::from_secs(30),
            command_timeout: Duration::from_secs(10),
        };

        Orchestrator::new(services, config)
    }

    async fn collect_until_finished(
        mut event_rx: mpsc::UnboundedReceiver<LoopEvent>,
    ) -> (Vec<LoopEvent>, String) {
        let mut events = Vec::new();
        let mut output = String::new();

        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), event_rx.recv())
                .await
                .expect("orchestration did not finish in time");
            match event {
                Some(LoopEvent::Finished { output: out }) => {
                    output = out;
                    break;
                }
                Some(event) => events.push(event),
                None => break,
            }
        }

        (events, output)
    }

    #[tokio::test]
    async fn test_full_phase_flow_without_focus_lines() {
        let dir = tempfile::tempdir().unwrap();
        // prediction, single intelligence (no focus lines), synthesis,
        // execution.
        let client = ScriptedClient::new(vec![
            text_turn("nothing notable"),
            text_turn("finding: module A is fine"),
            text_turn("plan: change nothing"),
            text_turn("done, no changes needed"),
        ]);

        let orch = orchestrator_with(dir.path(), client).await;
        let (event_rx, _input_tx) = orch.run("check the project".to_string());
        let (events, output) = collect_until_finished(event_rx).await;

        assert_eq!(output, "done, no changes needed");

        let phases: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                LoopEvent::PhaseStarted { phase } => Some(phase.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec!["prediction", "intelligence", "synthesis", "execution"]
        );
    }

    #[tokio::test]
    async fn test_prediction_focus_lines_fan_out() {
        let dir = tempfile::tempdir().unwrap();
        // Two focus lines → two intelligence runs.
        let client = ScriptedClient::new(vec![
            text_turn("- look at parser\n- look at config"),
            text_turn("parser finding"),
            text_turn("config finding"),
            text_turn("plan"),
            text_turn("executed"),
        ]);

        let orch = orchestrator_with(dir.path(), client).await;
        let (event_rx, _input_tx) = orch.run("audit".to_string());
        let (events, output) = collect_until_finished(event_rx).await;

        assert_eq!(output, "executed");

        let intelligence_runs = events
            .iter()
            .filter(|e| {
                matches!(e, LoopEvent::RunStarted { agent_id, .. } if agent_id == "intelligence")
            })
            .count();
        assert_eq!(intelligence_runs, 2);
    }

    #[tokio::test]
    async fn test_task_complete_overrides_turn_loop() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![
            text_turn("nothing notable"),
            text_turn("finding"),
            text_turn("plan"),
            // Execution signals completion via task_complete.
            tool_turn(
                "tc-done",
                "task_complete",
                json!({"summary": "wrote the fix"}),
            ),
        ]);

        let orch = orchestrator_with(dir.path(), client).await;
        let (event_rx, _input_tx) = orch.run("fix it".to_string());
        let (_events, output) = collect_until_finished(event_rx).await;

        assert_eq!(output, "wrote the fix");
    }

    #[tokio::test]
    async fn test_tool_call_feeds_result_into_next_turn() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), "hello note\n").unwrap();

        let client = ScriptedClient::new(vec![
            text_turn("nothing notable"),
            // Intelligence reads a file, then reports.
            tool_turn("tc-read", "read", json!({"file_path": "note.txt"})),
            text_turn("finding from note"),
            text_turn("plan"),
            text_turn("executed"),
        ]);

        let orch = orchestrator_with(dir.path(), client).await;
        let (event_rx, _input_tx) = orch.run("investigate".to_string());
        let (events, output) = collect_until_finished(event_rx).await;

        assert_eq!(output, "executed");

        let tool_result_ok = events.iter().any(|e| {
            matches!(
                e,
                LoopEvent::ToolResult { id, is_error: false, .. } if id == "tc-read"
            )
        });
        assert!(tool_result_ok);
    }

    #[tokio::test]
    async fn test_spawn_violation_terminates_offending_run() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![
            text_turn("nothing notable"),
            text_turn("finding"),
            // Synthesis tries to spawn execution, which it may not.
            tool_turn(
                "tc-spawn",
                "spawn_agent",
                json!({"agent_type": "execution", "prompt": "do it"}),
            ),
            // Execution still runs with the (error) synthesis output.
            text_turn("executed anyway"),
        ]);

        let orch = orchestrator_with(dir.path(), client).await;
        let (event_rx, _input_tx) = orch.run("task".to_string());
        let (events, output) = collect_until_finished(event_rx).await;

        assert_eq!(output, "executed anyway");

        let synthesis_errored = events.iter().any(|e| {
            matches!(
                e,
                LoopEvent::RunCompleted { agent_id, status, .. }
                    if agent_id == "synthesis" && status == "error"
            )
        });
        assert!(synthesis_errored);

        // The violating child must never have started.
        let child_started = events.iter().any(|e| {
            matches!(
                e,
                LoopEvent::RunStarted { agent_id, parent_run_id, .. }
                    if agent_id == "execution" && parent_run_id.is_some()
            )
        });
        assert!(!child_started);
    }

    #[tokio::test]
    async fn test_allowed_spawn_runs_child_and_feeds_result() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![
            text_turn("nothing notable"),
            text_turn("finding"),
            // Synthesis spawns an allowed intelligence child.
            tool_turn(
                "tc-spawn",
                "spawn_agent",
                json!({"agent_type": "intelligence", "prompt": "dig deeper"}),
            ),
            // Child intelligence run.
            text_turn("deep finding"),
            // Synthesis continues with the child's result.
            text_turn("final plan"),
            text_turn("executed"),
        ]);

        let orch = orchestrator_with(dir.path(), client).await;
        let (event_rx, _input_tx) = orch.run("task".to_string());
        let (events, output) = collect_until_finished(event_rx).await;

        assert_eq!(output, "executed");

        let child_started = events.iter().any(|e| {
            matches!(
                e,
                LoopEvent::RunStarted { agent_id, parent_run_id, .. }
                    if agent_id == "intelligence" && parent_run_id.is_some()
            )
        });
        assert!(child_started);

        let spawn_result_ok = events.iter().any(|e| {
            matches!(
                e,
                LoopEvent::ToolResult { id, is_error: false, output, .. }
                    if id == "tc-spawn" && output == "deep finding"
            )
        });
        assert!(spawn_result_ok);
    }

    #[tokio::test]
    async fn test_turn_budget_exhaustion_errors_the_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x\n").unwrap();

        // Prediction loops on read calls forever (5 turn budget).
        let mut scripts = Vec::new();
        for i in 0..5 {
            scripts.push(tool_turn(
                &format!("tc-{}", i),
                "read",
                json!({"file_path": "f.txt"}),
            ));
        }
        // Remaining phases still run.
        scripts.push(text_turn("finding"));
        scripts.push(text_turn("plan"));
        scripts.push(text_turn("executed"));

        let client = ScriptedClient::new(scripts);
        let orch = orchestrator_with(dir.path(), client).await;
        let (event_rx, _input_tx) = orch.run("task".to_string());
        let (events, output) = collect_until_finished(event_rx).await;

        assert_eq!(output, "executed");

        let prediction_errored = events.iter().any(|e| {
            matches!(
                e,
                LoopEvent::RunCompleted { agent_id, status, result, .. }
                    if agent_id == "prediction"
                        && status == "error"
                        && result.contains("Turn budget")
            )
        });
        assert!(prediction_errored);
    }

    #[tokio::test]
    async fn test_cancel_aborts_orchestration() {
        let dir = tempfile::tempdir().unwrap();

        // A client that never produces events, so the parser waits.
        struct StallingClient;

        #[async_trait]
        impl ModelClient for StallingClient {
            async fn stream_turn(
                &self,
                _system_prompt: &str,
                _messages: &[ModelMessage],
                _tools: &[ToolDefinition],
            ) -> anyhow::Result<mpsc::UnboundedReceiver<StreamEvent>> {
                let (tx, rx) = mpsc::unbounded_channel();
                // Keep the sender alive so the stream stays open.
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(300)).await;
                    drop(tx);
                });
                Ok(rx)
            }
        }

        let orch = orchestrator_with(dir.path(), Arc::new(StallingClient)).await;
        let (event_rx, input_tx) = orch.run("task".to_string());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = input_tx.send(LoopInput::Cancel);
        });

        let (events, _output) = collect_until_finished(event_rx).await;

        let aborted = events.iter().any(|e| {
            matches!(
                e,
                LoopEvent::RunCompleted { status, .. } if status == "aborted"
            )
        });
        assert!(aborted);
    }

    #[tokio::test]
    async fn test_failing_sibling_does_not_cancel_others() {
        let dir = tempfile::tempdir().unwrap();

        // Client that errors the second stream_turn call but serves
        // the rest normally. Intelligence siblings run concurrently,
        // so we key off call order within the phase.
        let client = ScriptedClient::new(vec![
            text_turn("- area one\n- area two"),
            vec![StreamEvent::Error {
                error: "overloaded".to_string(),
            }],
            text_turn("finding two"),
            text_turn("plan"),
            text_turn("executed"),
        ]);

        let orch = orchestrator_with(dir.path(), client).await;
        let (event_rx, _input_tx) = orch.run("task".to_string());
        let (events, output) = collect_until_finished(event_rx).await;

        assert_eq!(output, "executed");

        let intelligence_statuses: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                LoopEvent::RunCompleted {
                    agent_id, status, ..
                } if agent_id == "intelligence" => Some(status.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(intelligence_statuses.len(), 2);
        assert!(intelligence_statuses.iter().any(|s| s == "error"));
        assert!(intelligence_statuses.iter().any(|s| s == "complete"));
    }
}
