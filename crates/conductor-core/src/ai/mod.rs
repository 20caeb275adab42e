//! Model-facing types and the abstract streaming-event source.
//!
//! The raw network client that talks to a model provider lives outside
//! this crate; the core only consumes [`client::ModelClient`] and the
//! [`streaming::StreamEvent`] sequence it produces.

pub mod client;
pub mod streaming;
pub mod types;

pub use client::ModelClient;
pub use streaming::{StreamEvent, ToolCallAccumulator};
pub use types::{Content, ModelMessage, Role, ToolCall, ToolDefinition};
