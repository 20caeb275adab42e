//! Streaming HTTP model client.
//!
//! Implements the core's `ModelClient` trait over the Anthropic
//! Messages API. One `stream_turn` call issues one streaming request
//! and relays SSE frames as `StreamEvent`s until the turn stops.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use conductor_core::ai::{Content, ModelClient, ModelMessage, Role, StreamEvent, ToolDefinition};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    /// Build a client from the environment.
    ///
    /// Requires `ANTHROPIC_API_KEY`; `CONDUCTOR_MODEL` and
    /// `CONDUCTOR_BASE_URL` override the defaults.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY is not set")?;
        let model =
            std::env::var("CONDUCTOR_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url =
            std::env::var("CONDUCTOR_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url,
        })
    }

    fn request_body(
        &self,
        system_prompt: &str,
        messages: &[ModelMessage],
        tools: &[ToolDefinition],
    ) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(message_json)
            .collect();

        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();

        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "stream": true,
            "system": system_prompt,
            "messages": messages,
            "tools": tools,
        })
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn stream_turn(
        &self,
        system_prompt: &str,
        messages: &[ModelMessage],
        tools: &[ToolDefinition],
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let body = self.request_body(system_prompt, messages, tools);

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("request to model API failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("model API returned {}: {}", status, detail));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            // The current content block is a tool_use block. Text
            // blocks get no stop event of their own.
            let mut in_tool_block = false;

            'outer: while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error {
                            error: format!("stream read failed: {}", e),
                        });
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let frame: Value = match serde_json::from_str(data) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!(error = %e, "skipping undecodable SSE frame");
                            continue;
                        }
                    };

                    for event in frame_events(&frame, &mut in_tool_block) {
                        let stop = matches!(event, StreamEvent::TurnStop | StreamEvent::Error { .. });
                        if tx.send(event).is_err() || stop {
                            break 'outer;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn message_json(message: &ModelMessage) -> Value {
    let role = match message.role {
        Role::Assistant => "assistant",
        _ => "user",
    };

    let content: Vec<Value> = message
        .content
        .iter()
        .map(|block| match block {
            Content::Text { text } => json!({"type": "text", "text": text}),
            Content::ToolUse { id, name, input } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": input})
            }
            Content::ToolResult {
                tool_use_id,
                output,
                is_error,
            } => {
                let text = match output {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": text,
                    "is_error": is_error.unwrap_or(false),
                })
            }
        })
        .collect();

    json!({"role": role, "content": content})
}

/// Map one SSE frame to zero or more stream events.
fn frame_events(frame: &Value, in_tool_block: &mut bool) -> Vec<StreamEvent> {
    let frame_type = frame.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match frame_type {
        "content_block_start" => {
            let Some(block) = frame.get("content_block") else {
                return Vec::new();
            };
            if block.get("type").and_then(|t| t.as_str()) != Some("tool_use") {
                return Vec::new();
            }
            *in_tool_block = true;
            vec![StreamEvent::ToolBlockStart {
                id: str_field(block, "id"),
                name: str_field(block, "name"),
            }]
        }
        "content_block_delta" => {
            let Some(delta) = frame.get("delta") else {
                return Vec::new();
            };
            match delta.get("type").and_then(|t| t.as_str()) {
                Some("text_delta") => vec![StreamEvent::TextDelta {
                    delta: str_field(delta, "text"),
                }],
                Some("input_json_delta") => vec![StreamEvent::ToolInputDelta {
                    fragment: str_field(delta, "partial_json"),
                }],
                _ => Vec::new(),
            }
        }
        "content_block_stop" => {
            if *in_tool_block {
                *in_tool_block = false;
                vec![StreamEvent::ToolBlockStop]
            } else {
                Vec::new()
            }
        }
        "message_stop" => vec![StreamEvent::TurnStop],
        "error" => {
            let message = frame
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown model API error")
                .to_string();
            warn!(error = %message, "model API error frame");
            vec![StreamEvent::Error { error: message }]
        }
        _ => Vec::new(),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
