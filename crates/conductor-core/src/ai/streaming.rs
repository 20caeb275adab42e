//! Low-level streaming events and tool-call accumulation.
//!
//! One model turn arrives as an ordered sequence of [`StreamEvent`]s.
//! Tool input is streamed as raw text fragments; the accumulator buffers
//! them and decodes the full concatenation when the block closes.

use serde_json::Value;

/// One low-level event from a model turn's stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Text content delta.
    TextDelta { delta: String },

    /// A tool-use block opened. Input fragments follow.
    ToolBlockStart { id: String, name: String },

    /// Raw input fragment for the currently-open tool block.
    ToolInputDelta { fragment: String },

    /// The currently-open tool block closed; its input is complete.
    ToolBlockStop,

    /// The turn finished.
    TurnStop,

    /// Provider-side error; the turn cannot continue.
    Error { error: String },
}

/// Accumulates streamed input fragments for one tool-use block.
#[derive(Debug)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    buffer: String,
}

impl ToolCallAccumulator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            buffer: String::new(),
        }
    }

    /// Append a raw input fragment.
    pub fn push_fragment(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    /// Decode the accumulated buffer into a finished tool call.
    ///
    /// An empty buffer decodes to an empty input object. Returns `None`
    /// when the buffer is not valid JSON.
    pub fn try_complete(&mut self) -> Option<super::types::ToolCall> {
        let input = if self.buffer.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&self.buffer).ok()?
        };

        Some(super::types::ToolCall {
            id: std::mem::take(&mut self.id),
            name: std::mem::take(&mut self.name),
            input,
        })
    }

    /// Finish the tool call with empty input when the buffer is
    /// undecodable. The caller records a warning; the turn continues.
    pub fn force_complete(&mut self) -> super::types::ToolCall {
        super::types::ToolCall {
            id: std::mem::take(&mut self.id),
            name: std::mem::take(&mut self.name),
            input: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn raw_input(&self) -> &str {
        &self.buffer
    }
}
