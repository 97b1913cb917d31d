//! Scripted chat model for exercising the agent loop without a provider.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::{ChatModel, ModelDelta, ModelError, ModelStream};
use crate::models::{ChatMessage, ToolCall};
use crate::tools::ToolDefinition;

enum Scripted {
    Deltas(Vec<Result<ModelDelta, String>>),
    OpenError(u16, String),
}

/// Returns queued responses in order, one per `stream_chat` call.
///
/// Once the queue is empty the `repeat` response (if any) is returned forever;
/// otherwise the call fails.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<Vec<ModelDelta>>,
    delta_delay: Option<Duration>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model that requests the same tool call on every invocation.
    pub fn looping(call: ToolCall) -> Self {
        Self {
            repeat: Some(vec![ModelDelta::ToolCall(call)]),
            ..Self::default()
        }
    }

    /// Sleep before yielding each delta.
    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = Some(delay);
        self
    }

    pub fn queue_deltas(&self, deltas: Vec<ModelDelta>) {
        self.push(Scripted::Deltas(deltas.into_iter().map(Ok).collect()));
    }

    /// Answer text, split on whitespace boundaries into several chunks.
    pub fn queue_text(&self, text: &str) {
        let deltas = text
            .split_inclusive(' ')
            .map(|part| ModelDelta::Text(part.to_string()))
            .collect();
        self.queue_deltas(deltas);
    }

    pub fn queue_tool_call(&self, id: &str, name: &str, args: serde_json::Value) {
        self.queue_deltas(vec![ModelDelta::ToolCall(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
        })]);
    }

    /// Fail the request before any delta is produced.
    pub fn queue_open_error(&self, status: u16, message: &str) {
        self.push(Scripted::OpenError(status, message.to_string()));
    }

    /// Yield `deltas`, then fail mid-stream.
    pub fn queue_stream_error(&self, deltas: Vec<ModelDelta>, message: &str) {
        let mut items: Vec<Result<ModelDelta, String>> = deltas.into_iter().map(Ok).collect();
        items.push(Err(message.to_string()));
        self.push(Scripted::Deltas(items));
    }

    /// Number of `stream_chat` calls so far.
    pub fn call_count(&self) -> usize {
        self.lock_requests().len()
    }

    /// The message history passed on each call.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.lock_requests().clone()
    }

    fn push(&self, step: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(step);
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<Vec<ChatMessage>>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ModelStream, ModelError> {
        self.lock_requests().push(messages.to_vec());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();

        let items = match next {
            Some(Scripted::Deltas(items)) => items,
            Some(Scripted::OpenError(status, message)) => {
                return Err(ModelError::Api { status, message })
            }
            None => match &self.repeat {
                Some(deltas) => deltas.iter().cloned().map(Ok).collect(),
                None => {
                    return Err(ModelError::InvalidResponse(
                        "scripted model has no response queued".to_string(),
                    ))
                }
            },
        };

        let delay = self.delta_delay;
        let stream = stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item.map_err(ModelError::Stream)
        });
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
