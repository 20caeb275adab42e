//! Routing of external inputs to waiting agent runs.
//!
//! Several runs may await approvals at the same time, so a single
//! `LoopInput` receiver cannot be threaded through one run's executor.
//! The router pumps the input channel and correlates each approval to
//! the run waiting on that tool call id; `Cancel` trips the shared
//! cancellation token and denies everything pending.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::loop_events::LoopInput;

pub(crate) struct InputRouter {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    cancel: CancellationToken,
}

impl InputRouter {
    pub fn new(cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            cancel,
        })
    }

    /// Start pumping inputs. Runs until the input channel closes or
    /// cancellation fires.
    pub fn spawn_pump(self: &Arc<Self>, mut input_rx: mpsc::UnboundedReceiver<LoopInput>) {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let input = tokio::select! {
                    _ = router.cancel.cancelled() => break,
                    input = input_rx.recv() => match input {
                        Some(input) => input,
                        None => break,
                    },
                };

                match input {
                    LoopInput::ToolApproval {
                        tool_call_id,
                        approved,
                    } => {
                        let tx = router.pending.lock().await.remove(&tool_call_id);
                        match tx {
                            Some(tx) => {
                                let _ = tx.send(approved);
                            }
                            None => {
                                tracing::debug!(
                                    tool_call_id,
                                    "approval for unknown or already-settled tool call"
                                );
                            }
                        }
                    }
                    LoopInput::Cancel => {
                        router.cancel.cancel();
                        break;
                    }
                }
            }

            // Deny everything still waiting.
            let mut pending = router.pending.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(false);
            }
        });
    }

    /// Register interest in the approval outcome for one tool call.
    pub async fn subscribe(&self, tool_call_id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(tool_call_id.to_string(), tx);
        rx
    }

    /// Drop a subscription that will no longer be awaited.
    pub async fn unsubscribe(&self, tool_call_id: &str) {
        self.pending.lock().await.remove(tool_call_id);
    }
}
