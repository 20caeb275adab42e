//! One finalized model turn.

use crate::ai::types::ToolCall;

/// An ordered content block within a turn.
#[derive(Debug, Clone)]
pub enum TurnBlock {
    Text(String),
    ToolUse(ToolCall),
}

/// One complete model round: ordered text and tool-use blocks.
///
/// Built incrementally by the stream parser; immutable once returned.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub blocks: Vec<TurnBlock>,
    /// True when the stream was cancelled or failed before the turn
    /// ended. An incomplete turn's blocks are whatever finalized
    /// before the cut.
    pub incomplete: bool,
    /// Local warnings recorded during parsing (e.g. undecodable tool
    /// input that degraded to an empty object).
    pub warnings: Vec<String>,
}

impl Turn {
    /// Concatenated text content, in block order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let TurnBlock::Text(text) = block {
                out.push_str(text);
            }
        }
        out
    }

    /// Tool calls in the order they appeared.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                TurnBlock::ToolUse(call) => Some(call),
                TurnBlock::Text(_) => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b, TurnBlock::ToolUse(_)))
    }
}
