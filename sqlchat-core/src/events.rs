//! Events streamed to clients for a single chat request.
//!
//! Every request yields an ordered sequence of [`ChatEvent`]s that ends with
//! exactly one terminal event (`done` or `error`). Each event is serialized as
//! `{"type": ..., "data": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        name: String,
        result: String,
        is_error: bool,
    },
    Chunk(String),
    Done(String),
    Error(String),
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done(_) | ChatEvent::Error(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::ToolCall { .. } => "tool_call",
            ChatEvent::ToolResult { .. } => "tool_result",
            ChatEvent::Chunk(_) => "chunk",
            ChatEvent::Done(_) => "done",
            ChatEvent::Error(_) => "error",
        }
    }

    /// Single-line JSON form used as the SSE `data:` payload.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({"type": "error", "data": format!("failed to encode event: {}", e)})
                .to_string()
        })
    }
}

/// The consumer went away; nothing further can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event stream consumer disconnected")]
pub struct Disconnected;

/// Producer half of a per-request event stream.
///
/// Cloneable; all clones share the terminal flag so at most one terminal
/// event is ever delivered.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ChatEvent>,
    terminated: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bounded channel plus its sink.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Deliver one event, waiting for channel capacity.
    ///
    /// Events offered after the terminal event are dropped.
    pub async fn send(&self, event: ChatEvent) -> Result<(), Disconnected> {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::SeqCst) {
                tracing::warn!(kind = event.kind(), "Dropping second terminal event");
                return Ok(());
            }
        } else if self.is_terminated() {
            tracing::warn!(kind = event.kind(), "Dropping event after terminal event");
            return Ok(());
        }
        self.tx.send(event).await.map_err(|_| Disconnected)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let chunk = serde_json::to_value(ChatEvent::Chunk("Hel".to_string())).unwrap();
        assert_eq!(chunk, serde_json::json!({"type": "chunk", "data": "Hel"}));

        let call = serde_json::to_value(ChatEvent::ToolCall {
            id: "call_1".to_string(),
            name: "sql_db_query".to_string(),
            args: serde_json::json!({"query": "SELECT 1"}),
        })
        .unwrap();
        assert_eq!(call["type"], "tool_call");
        assert_eq!(call["data"]["name"], "sql_db_query");
        assert_eq!(call["data"]["args"]["query"], "SELECT 1");

        let done = ChatEvent::Done("All set".to_string()).to_json_line();
        assert_eq!(done, r#"{"type":"done","data":"All set"}"#);
        assert!(!done.contains('\n'));
    }

    #[tokio::test]
    async fn test_sink_delivers_single_terminal_event() {
        let (sink, mut rx) = EventSink::channel(8);

        sink.send(ChatEvent::Chunk("a".to_string())).await.unwrap();
        sink.send(ChatEvent::Done("a".to_string())).await.unwrap();
        sink.send(ChatEvent::Error("late".to_string())).await.unwrap();
        sink.send(ChatEvent::Chunk("late".to_string())).await.unwrap();
        drop(sink);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(
            received,
            vec![ChatEvent::Chunk("a".to_string()), ChatEvent::Done("a".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sink_reports_disconnect() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);

        assert!(sink.is_closed());
        let result = sink.send(ChatEvent::Chunk("x".to_string())).await;
        assert_eq!(result, Err(Disconnected));
    }
}
