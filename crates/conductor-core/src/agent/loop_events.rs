//! Canonical event protocol for the orchestration loop.
//!
//! `LoopEvent` is the single source of truth for everything the
//! orchestrator emits. Front ends (CLI, service) consume these events
//! and map them to their own presentation format.
//!
//! `LoopInput` represents external inputs fed back into the running
//! orchestrator (tool approvals, cancellation).

use serde::Serialize;

/// Events emitted by the orchestrator.
///
/// Each variant is a discrete state change. Events carry the id of the
/// agent run they belong to, since several runs may stream at once.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    // ── Phase lifecycle ────────────────────────────────────────────
    /// A phase began.
    PhaseStarted { phase: String },

    /// A phase finished; all of its runs have settled.
    PhaseCompleted { phase: String },

    // ── Run lifecycle ──────────────────────────────────────────────
    /// An agent run was spawned.
    RunStarted {
        run_id: String,
        agent_id: String,
        parent_run_id: Option<String>,
    },

    /// An agent run settled.
    RunCompleted {
        run_id: String,
        agent_id: String,
        status: String,
        result: String,
    },

    // ── Streaming ──────────────────────────────────────────────────
    /// Text content delta from a model response.
    TextDelta { run_id: String, delta: String },

    // ── Tool lifecycle ─────────────────────────────────────────────
    /// The model is starting to stream a tool call (input not yet
    /// complete).
    ToolCallStart {
        run_id: String,
        id: String,
        name: String,
    },

    /// Tool call input fully received.
    ToolCallComplete {
        run_id: String,
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool is being executed.
    ToolExecuting {
        run_id: String,
        id: String,
        name: String,
    },

    /// Tool execution completed with a result.
    ToolResult {
        run_id: String,
        id: String,
        output: String,
        is_error: bool,
    },

    // ── Approval ───────────────────────────────────────────────────
    /// Tool requires approval before execution.
    ToolApprovalRequired {
        run_id: String,
        id: String,
        name: String,
        input: serde_json::Value,
        reason: Option<String>,
    },

    /// Tool was approved.
    ToolApproved { run_id: String, id: String },

    /// Tool was denied.
    ToolDenied { run_id: String, id: String },

    // ── Turn lifecycle ─────────────────────────────────────────────
    /// One model turn completed.
    TurnComplete {
        run_id: String,
        turn: u32,
        has_more: bool,
    },

    /// The whole orchestration finished.
    Finished { output: String },

    /// Error occurred.
    Error { error: String },
}

/// External inputs the platform provides back to the orchestrator.
#[derive(Debug, Clone)]
pub enum LoopInput {
    /// User approved or denied a tool execution.
    ToolApproval {
        tool_call_id: String,
        approved: bool,
    },

    /// User requested cancellation of the whole orchestration.
    Cancel,
}
