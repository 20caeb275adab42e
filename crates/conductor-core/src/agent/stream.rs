//! Stream processing for one model turn.
//!
//! Consumes [`StreamEvent`]s from a `ModelClient::stream_turn()` call
//! and builds a finalized [`Turn`], emitting `LoopEvent`s for each
//! meaningful state change. Handles stream timeout (120s of no data)
//! and external cancellation.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::streaming::{StreamEvent, ToolCallAccumulator};

use super::loop_events::LoopEvent;
use super::turn::{Turn, TurnBlock};

const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Parse one model turn from a stream of events.
///
/// Single pass: text deltas accumulate into the current text segment;
/// a tool-block-start flushes that segment and opens an accumulator;
/// a tool-block-stop decodes the accumulated input. Cancellation stops
/// consumption immediately and returns whatever finalized so far,
/// flagged incomplete; a not-yet-closed tool block is discarded rather
/// than emitted with malformed input.
pub(crate) async fn parse_turn(
    mut event_rx: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: &CancellationToken,
    loop_tx: &mpsc::UnboundedSender<LoopEvent>,
    run_id: &str,
) -> Turn {
    let mut turn = Turn::default();
    let mut text_buffer = String::new();
    let mut open_block: Option<ToolCallAccumulator> = None;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                turn.incomplete = true;
                break;
            }
            received = tokio::time::timeout(STREAM_TIMEOUT, event_rx.recv()) => {
                match received {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_) => {
                        let _ = loop_tx.send(LoopEvent::Error {
                            error: "Model stream timeout: no data received for 120 seconds"
                                .to_string(),
                        });
                        turn.incomplete = true;
                        break;
                    }
                }
            }
        };

        match event {
            StreamEvent::TextDelta { delta } => {
                text_buffer.push_str(&delta);
                let _ = loop_tx.send(LoopEvent::TextDelta {
                    run_id: run_id.to_string(),
                    delta,
                });
            }
            StreamEvent::ToolBlockStart { id, name } => {
                flush_text(&mut turn, &mut text_buffer);
                let _ = loop_tx.send(LoopEvent::ToolCallStart {
                    run_id: run_id.to_string(),
                    id: id.clone(),
                    name: name.clone(),
                });
                open_block = Some(ToolCallAccumulator::new(id, name));
            }
            StreamEvent::ToolInputDelta { fragment } => {
                if let Some(block) = open_block.as_mut() {
                    block.push_fragment(&fragment);
                } else {
                    tracing::warn!(run_id, "tool input delta with no open block");
                }
            }
            StreamEvent::ToolBlockStop => {
                let Some(mut block) = open_block.take() else {
                    tracing::warn!(run_id, "tool block stop with no open block");
                    continue;
                };

                let call = match block.try_complete() {
                    Some(call) => call,
                    None => {
                        let warning = format!(
                            "Undecodable input for tool '{}', degraded to empty object",
                            block.name
                        );
                        tracing::warn!(run_id, raw = block.raw_input(), "{}", warning);
                        turn.warnings.push(warning);
                        block.force_complete()
                    }
                };

                let _ = loop_tx.send(LoopEvent::ToolCallComplete {
                    run_id: run_id.to_string(),
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
                turn.blocks.push(TurnBlock::ToolUse(call));
            }
            StreamEvent::TurnStop => break,
            StreamEvent::Error { error } => {
                let _ = loop_tx.send(LoopEvent::Error { error });
                turn.incomplete = true;
                break;
            }
        }
    }

    flush_text(&mut turn, &mut text_buffer);
    turn
}

fn flush_text(turn: &mut Turn, buffer: &mut String) {
    if !buffer.is_empty() {
        turn.blocks.push(TurnBlock::Text(std::mem::take(buffer)));
    }
}
