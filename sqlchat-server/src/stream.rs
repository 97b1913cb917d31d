//! Per-request chat stream supervision.
//!
//! A request moves `Received → Streaming → Completed | Failed`, or to
//! `Abandoned` when the client goes away first. The agent turn runs in its own
//! task so a panic inside it still produces a terminal `error` event, and a
//! disconnect aborts it instead of letting it run to completion unobserved.

use std::sync::Arc;

use sqlchat_core::{Agent, ChatEvent, EventSink, TurnError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `done` was delivered
    Completed,
    /// `error` was delivered
    Failed,
    /// The consumer disconnected before a terminal event
    Abandoned,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::Failed => "failed",
            StreamOutcome::Abandoned => "abandoned",
        }
    }
}

/// Start answering `message` in `conversation_id`.
///
/// Returns the event receiver and a handle resolving to the stream's outcome.
/// Dropping the receiver aborts the turn.
pub fn spawn_chat_stream(
    agent: Arc<Agent>,
    conversation_id: String,
    message: String,
    buffer: usize,
) -> (mpsc::Receiver<ChatEvent>, JoinHandle<StreamOutcome>) {
    let (sink, rx) = EventSink::channel(buffer);
    tracing::info!(conversation_id = %conversation_id, "Chat request received");

    let handle = tokio::spawn(async move {
        let turn_sink = sink.clone();
        let turn_id = conversation_id.clone();
        let mut turn = tokio::spawn(async move {
            agent.respond(&turn_id, &message, &turn_sink).await
        });
        tracing::debug!(conversation_id = %conversation_id, "Streaming");

        let outcome = tokio::select! {
            joined = &mut turn => match joined {
                Ok(Ok(_)) => StreamOutcome::Completed,
                Ok(Err(TurnError::Disconnected(_))) => StreamOutcome::Abandoned,
                Ok(Err(_)) => StreamOutcome::Failed,
                Err(e) if e.is_panic() => {
                    tracing::error!(conversation_id = %conversation_id, "Agent task panicked");
                    if !sink.is_terminated() {
                        let _ = sink
                            .send(ChatEvent::Error("internal error while answering".to_string()))
                            .await;
                    }
                    StreamOutcome::Failed
                }
                Err(_) => StreamOutcome::Abandoned,
            },
            _ = sink.closed() => {
                turn.abort();
                StreamOutcome::Abandoned
            }
        };

        tracing::info!(
            conversation_id = %conversation_id,
            outcome = outcome.as_str(),
            "Chat stream finished"
        );
        outcome
    });

    (rx, handle)
}
