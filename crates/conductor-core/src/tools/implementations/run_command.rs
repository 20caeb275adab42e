//! Run-command tool - Execute shell commands with bounded output capture

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::tools::registry::Tool;
use crate::tools::{parse_params, ToolContext, ToolResult};

const MAX_OUTPUT_LINES: usize = 2000;
const MAX_OUTPUT_BYTES: usize = 50_000;
const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
const READER_JOIN_TIMEOUT_MS: u64 = 2_000;
/// Margin kept under the registry's outer timeout so the timeout
/// resolves here, with partial output, rather than in the wrapper.
const OUTER_TIMEOUT_GRACE_MS: u64 = 2_000;

pub struct RunCommandTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    description: Option<String>,
}

struct BoundedOutputBuffer {
    lines: VecDeque<String>,
    total_bytes: usize,
    dropped_lines: usize,
    max_lines: usize,
    max_bytes: usize,
}

impl BoundedOutputBuffer {
    fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            total_bytes: 0,
            dropped_lines: 0,
            max_lines,
            max_bytes,
        }
    }

    fn push_line(&mut self, line: &str) {
        let mut kept = line.to_string();
        if kept.len() > self.max_bytes {
            kept = tail_by_bytes(&kept, self.max_bytes);
        }

        self.total_bytes = self.total_bytes.saturating_add(kept.len());
        self.lines.push_back(kept);

        while self.lines.len() > self.max_lines || self.total_bytes > self.max_bytes {
            if let Some(removed) = self.lines.pop_front() {
                self.total_bytes = self.total_bytes.saturating_sub(removed.len());
                self.dropped_lines = self.dropped_lines.saturating_add(1);
            } else {
                break;
            }
        }
    }

    fn into_text(self) -> String {
        let mut out = self.lines.into_iter().collect::<Vec<_>>().join("\n");
        if self.dropped_lines > 0 {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!(
                "[... omitted {} earlier line(s) due to buffer limits ...]",
                self.dropped_lines
            ));
        }
        out
    }
}

/// Keep the tail of a string within `max_bytes`, preserving UTF-8 boundaries.
fn tail_by_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut start = text.len().saturating_sub(max_bytes);
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

fn build_shell_command(command: &str, ctx: &ToolContext) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.env("NO_COLOR", "1");
    cmd.current_dir(&ctx.working_dir);
    cmd
}

async fn collect_pipe_output<R>(pipe: Option<R>, buffer: Arc<Mutex<BoundedOutputBuffer>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(pipe) = pipe else {
        return;
    };

    let mut reader = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        buffer.lock().await.push_line(&line);
    }
}

async fn join_reader_with_timeout(mut handle: tokio::task::JoinHandle<()>) {
    if timeout(Duration::from_millis(READER_JOIN_TIMEOUT_MS), &mut handle)
        .await
        .is_err()
    {
        handle.abort();
        let _ = handle.await;
    }
}

async fn kill_child(child: &mut Child) {
    let _ = child.kill().await;
    let _ = child.wait().await;
}

enum WaitOutcome {
    Exited(i32),
    TimedOut,
    Cancelled,
}

async fn execute_foreground(
    mut cmd: Command,
    timeout_duration: Duration,
    ctx: &ToolContext,
) -> ToolResult {
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let buffer = Arc::new(Mutex::new(BoundedOutputBuffer::new(
        MAX_OUTPUT_LINES,
        MAX_OUTPUT_BYTES,
    )));

    let stdout_handle = tokio::spawn(collect_pipe_output(stdout, Arc::clone(&buffer)));
    let stderr_handle = tokio::spawn(collect_pipe_output(stderr, Arc::clone(&buffer)));

    let outcome = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            kill_child(&mut child).await;
            WaitOutcome::Cancelled
        }
        wait_result = timeout(timeout_duration, child.wait()) => {
            match wait_result {
                Ok(Ok(status)) => WaitOutcome::Exited(status.code().unwrap_or(-1)),
                Ok(Err(e)) => {
                    tracing::error!("Process wait error: {}", e);
                    WaitOutcome::Exited(-1)
                }
                Err(_) => {
                    kill_child(&mut child).await;
                    WaitOutcome::TimedOut
                }
            }
        }
    };

    join_reader_with_timeout(stdout_handle).await;
    join_reader_with_timeout(stderr_handle).await;

    let output = {
        let mut guard = buffer.lock().await;
        let captured = std::mem::replace(
            &mut *guard,
            BoundedOutputBuffer::new(MAX_OUTPUT_LINES, MAX_OUTPUT_BYTES),
        );
        captured.into_text()
    };

    match outcome {
        WaitOutcome::Exited(0) => ToolResult::success_data(json!({
            "output": output,
            "exit_code": 0
        })),
        WaitOutcome::Exited(code) => ToolResult::error_with_data(
            "command_failed",
            format!("Command exited with code {}", code),
            Some(json!({ "output": output, "exit_code": code })),
        ),
        WaitOutcome::TimedOut => ToolResult::error_with_data(
            "timeout",
            format!(
                "Command timed out after {} ms",
                timeout_duration.as_millis()
            ),
            Some(json!({ "output": output })),
        ),
        WaitOutcome::Cancelled => ToolResult::error_with_data(
            "cancelled",
            "Command cancelled",
            Some(json!({ "output": output })),
        ),
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace. Output is captured with line and byte limits. \
         For file operations prefer the read, write, edit, list, and search tools."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in milliseconds (max 600000)"
                },
                "description": {
                    "type": "string",
                    "description": "Clear, concise description of what this command does in 5-10 words"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        match &params.description {
            Some(desc) => {
                tracing::info!(command = %params.command, description = %desc, "Executing command")
            }
            None => tracing::info!(command = %params.command, "Executing command"),
        }

        let mut cmd = build_shell_command(&params.command, ctx);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let outer_ms = ctx
            .timeout
            .map(|d| d.as_millis() as u64)
            .unwrap_or(MAX_TIMEOUT_MS);
        let inner_cap = outer_ms.saturating_sub(OUTER_TIMEOUT_GRACE_MS).max(1);
        let timeout_ms = params
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS)
            .min(inner_cap);
        execute_foreground(cmd, Duration::from_millis(timeout_ms), ctx).await
    }
}
