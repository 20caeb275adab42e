//! Abstract model client.
//!
//! The concrete network client (HTTP/SSE, retries, auth) is an external
//! collaborator. The core depends only on this trait: one call produces
//! one ordered event stream for one model turn.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::streaming::StreamEvent;
use super::types::{ModelMessage, ToolDefinition};

/// Streaming-event source for one model turn.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start one model turn and return its ordered event stream.
    ///
    /// The receiver yields events until `TurnStop` (or `Error`), after
    /// which the sender side is dropped.
    async fn stream_turn(
        &self,
        system_prompt: &str,
        messages: &[ModelMessage],
        tools: &[ToolDefinition],
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>>;
}
