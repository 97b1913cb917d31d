//! Bounded model → tools → model loop that turns one user message into an
//! ordered, terminated sequence of [`ChatEvent`]s.
//!
//! History is committed at two points only: the user message before the first
//! model call, and each assistant step together with the results of the tools
//! it requested (or the final answer). A turn that fails or is abandoned part
//! way keeps everything committed before that point.

use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AgentConfig, DEFAULT_SYSTEM_PROMPT};
use crate::events::{ChatEvent, Disconnected, EventSink};
use crate::memory::{Conversation, ConversationStore};
use crate::model::{ChatModel, ModelDelta, ModelError};
use crate::models::{ChatMessage, ToolResult};
use crate::tools::ToolBox;

pub const DEFAULT_MAX_ITERATIONS: usize = 5;

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("model request failed: {0}")]
    Model(#[from] ModelError),

    #[error("could not complete the request within {0} steps")]
    IterationLimit(usize),

    #[error(transparent)]
    Disconnected(#[from] Disconnected),
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: ToolBox,
    memory: Arc<ConversationStore>,
    system_prompt: String,
    max_iterations: usize,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolBox, memory: Arc<ConversationStore>) -> Self {
        Self {
            model,
            tools,
            memory,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn from_config(
        model: Arc<dyn ChatModel>,
        tools: ToolBox,
        memory: Arc<ConversationStore>,
        config: &AgentConfig,
    ) -> Self {
        Self::new(model, tools, memory)
            .with_system_prompt(config.system_prompt.clone())
            .with_max_iterations(config.max_iterations)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn memory(&self) -> &Arc<ConversationStore> {
        &self.memory
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Answer `message` within conversation `conversation_id`, streaming every
    /// step into `sink`.
    ///
    /// Unless the consumer disconnects, exactly one terminal event is sent:
    /// `done` with the final answer on success, `error` otherwise. The returned
    /// error mirrors the terminal event.
    pub async fn respond(
        &self,
        conversation_id: &str,
        message: &str,
        sink: &EventSink,
    ) -> Result<String, TurnError> {
        let handle = self
            .memory
            .get_or_create(conversation_id, &self.system_prompt)
            .await;
        let mut conversation = handle.lock().await;
        conversation.push(ChatMessage::user(message));

        match self.run_turn(&mut conversation, sink).await {
            Ok(answer) => {
                tracing::info!(
                    conversation_id,
                    answer_len = answer.len(),
                    "Turn completed"
                );
                sink.send(ChatEvent::Done(answer.clone())).await?;
                Ok(answer)
            }
            Err(TurnError::Disconnected(e)) => {
                tracing::info!(conversation_id, "Client disconnected, abandoning turn");
                Err(TurnError::Disconnected(e))
            }
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "Turn failed");
                sink.send(ChatEvent::Error(e.to_string())).await?;
                Err(e)
            }
        }
    }

    async fn run_turn(
        &self,
        conversation: &mut Conversation,
        sink: &EventSink,
    ) -> Result<String, TurnError> {
        let definitions = self.tools.definitions();

        for iteration in 0..self.max_iterations {
            tracing::debug!(
                conversation_id = %conversation.id,
                iteration,
                model = self.model.name(),
                "Invoking model"
            );

            let mut stream = self
                .model
                .stream_chat(conversation.messages(), &definitions)
                .await?;

            let mut text = String::new();
            let mut calls = Vec::new();
            while let Some(delta) = stream.next().await {
                match delta? {
                    ModelDelta::Text(fragment) => {
                        text.push_str(&fragment);
                        sink.send(ChatEvent::Chunk(fragment)).await?;
                    }
                    ModelDelta::ToolCall(call) => calls.push(call),
                }
            }

            if calls.is_empty() {
                conversation.push(ChatMessage::assistant(text.clone()));
                return Ok(text);
            }

            let mut results: Vec<ToolResult> = Vec::with_capacity(calls.len());
            for call in &calls {
                sink.send(ChatEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                })
                .await?;

                let result = self.tools.invoke(call).await;
                tracing::info!(
                    tool = %call.name,
                    is_error = result.is_error,
                    iteration,
                    "Tool executed"
                );

                sink.send(ChatEvent::ToolResult {
                    id: result.tool_call_id.clone(),
                    name: result.name.clone(),
                    result: result.content.clone(),
                    is_error: result.is_error,
                })
                .await?;
                results.push(result);
            }

            conversation.push(ChatMessage::assistant_tool_calls(text, calls));
            conversation.extend(results.into_iter().map(ChatMessage::Tool));
        }

        Err(TurnError::IterationLimit(self.max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db;
    use crate::model::mock::ScriptedModel;
    use crate::models::ToolCall;
    use crate::tools::{LIST_TABLES_TOOL, QUERY_TOOL};
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn seeded_tools() -> (tempfile::TempDir, ToolBox) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("company.db").display());
        let pool = db::create_pool(&DatabaseConfig {
            url,
            max_connections: 2,
        })
        .await
        .unwrap();
        db::bootstrap(&pool).await.unwrap();
        (dir, ToolBox::sql(pool))
    }

    fn agent(model: Arc<ScriptedModel>, tools: ToolBox) -> Agent {
        Agent::new(model, tools, Arc::new(ConversationStore::new())).with_system_prompt("sys")
    }

    async fn drain(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_direct_answer_streams_chunks_then_done() {
        let (_dir, tools) = seeded_tools().await;
        let model = Arc::new(ScriptedModel::new());
        model.queue_text("Hello there friend");
        let agent = agent(model, tools);

        let (sink, rx) = EventSink::channel(32);
        let answer = agent.respond("c1", "hi", &sink).await.unwrap();
        drop(sink);
        let events = drain(rx).await;

        assert_eq!(answer, "Hello there friend");
        assert_eq!(
            events,
            vec![
                ChatEvent::Chunk("Hello ".to_string()),
                ChatEvent::Chunk("there ".to_string()),
                ChatEvent::Chunk("friend".to_string()),
                ChatEvent::Done("Hello there friend".to_string()),
            ]
        );

        let conversation = agent.memory().snapshot("c1").await.unwrap();
        assert_eq!(
            conversation.messages(),
            &[
                ChatMessage::system("sys"),
                ChatMessage::user("hi"),
                ChatMessage::assistant("Hello there friend"),
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_round_trip_emits_call_then_result() {
        let (_dir, tools) = seeded_tools().await;
        let model = Arc::new(ScriptedModel::new());
        model.queue_tool_call("call_a", LIST_TABLES_TOOL, json!({}));
        model.queue_tool_call(
            "call_b",
            QUERY_TOOL,
            json!({"query": "SELECT COUNT(*) FROM Employees WHERE Department = 'Sales'"}),
        );
        model.queue_text("There are 2 employees in Sales.");
        let agent = agent(model.clone(), tools);

        let (sink, rx) = EventSink::channel(32);
        agent.respond("c1", "How many in Sales?", &sink).await.unwrap();
        drop(sink);
        let events = drain(rx).await;

        assert_eq!(
            events[0],
            ChatEvent::ToolCall {
                id: "call_a".to_string(),
                name: LIST_TABLES_TOOL.to_string(),
                args: json!({}),
            }
        );
        assert_eq!(
            events[1],
            ChatEvent::ToolResult {
                id: "call_a".to_string(),
                name: LIST_TABLES_TOOL.to_string(),
                result: "Employees".to_string(),
                is_error: false,
            }
        );
        assert!(matches!(&events[2], ChatEvent::ToolCall { id, .. } if id == "call_b"));
        assert!(
            matches!(&events[3], ChatEvent::ToolResult { id, result, .. } if id == "call_b" && result == "[[2]]")
        );
        assert_eq!(
            events.last(),
            Some(&ChatEvent::Done("There are 2 employees in Sales.".to_string()))
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        // Third model call saw both tool steps and their results
        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        let last = &requests[2];
        assert_eq!(last.len(), 6);
        assert!(matches!(&last[5], ChatMessage::Tool(r) if r.content == "[[2]]"));
    }

    #[tokio::test]
    async fn test_tool_error_is_fed_back_to_model() {
        let (_dir, tools) = seeded_tools().await;
        let model = Arc::new(ScriptedModel::new());
        model.queue_tool_call("call_1", QUERY_TOOL, json!({"query": "SELECT * FROM Payroll"}));
        model.queue_text("That table does not exist.");
        let agent = agent(model, tools);

        let (sink, rx) = EventSink::channel(32);
        agent.respond("c1", "payroll?", &sink).await.unwrap();
        drop(sink);
        let events = drain(rx).await;

        match &events[1] {
            ChatEvent::ToolResult {
                result, is_error, ..
            } => {
                assert!(is_error);
                assert!(result.starts_with("Error:"), "{}", result);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
        assert!(matches!(events.last(), Some(ChatEvent::Done(_))));
    }

    #[tokio::test]
    async fn test_runaway_loop_ends_with_error() {
        let (_dir, tools) = seeded_tools().await;
        let model = Arc::new(ScriptedModel::looping(ToolCall {
            id: "call_loop".to_string(),
            name: LIST_TABLES_TOOL.to_string(),
            args: json!({}),
        }));
        let agent = agent(model.clone(), tools).with_max_iterations(3);

        let (sink, rx) = EventSink::channel(64);
        let err = agent.respond("c1", "loop", &sink).await.unwrap_err();
        drop(sink);
        let events = drain(rx).await;

        assert!(matches!(err, TurnError::IterationLimit(3)));
        assert_eq!(model.call_count(), 3);
        assert_eq!(
            events.iter().filter(|e| matches!(e, ChatEvent::ToolCall { .. })).count(),
            3
        );
        match events.last() {
            Some(ChatEvent::Error(message)) => assert!(message.contains("within 3 steps")),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_model_failure_emits_error_and_keeps_history() {
        let (_dir, tools) = seeded_tools().await;
        let model = Arc::new(ScriptedModel::new());
        model.queue_open_error(503, "service unavailable");
        let agent = agent(model, tools);

        let (sink, rx) = EventSink::channel(8);
        let err = agent.respond("c1", "anyone?", &sink).await.unwrap_err();
        drop(sink);
        let events = drain(rx).await;

        assert!(matches!(err, TurnError::Model(_)));
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChatEvent::Error(m) if m.contains("service unavailable")));

        let conversation = agent.memory().snapshot("c1").await.unwrap();
        assert_eq!(conversation.messages().last(), Some(&ChatMessage::user("anyone?")));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_after_chunks() {
        let (_dir, tools) = seeded_tools().await;
        let model = Arc::new(ScriptedModel::new());
        model.queue_stream_error(vec![ModelDelta::Text("Partial".to_string())], "connection reset");
        let agent = agent(model, tools);

        let (sink, rx) = EventSink::channel(8);
        assert!(agent.respond("c1", "q", &sink).await.is_err());
        drop(sink);
        let events = drain(rx).await;

        assert_eq!(events[0], ChatEvent::Chunk("Partial".to_string()));
        assert!(matches!(&events[1], ChatEvent::Error(m) if m.contains("connection reset")));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_follow_up_sees_prior_turns() {
        let (_dir, tools) = seeded_tools().await;
        let model = Arc::new(ScriptedModel::new());
        model.queue_text("David Brown");
        model.queue_text("Engineering");
        let agent = agent(model.clone(), tools);

        for question in ["Who earns most?", "Which department?"] {
            let (sink, rx) = EventSink::channel(32);
            agent.respond("c1", question, &sink).await.unwrap();
            drop(sink);
            drain(rx).await;
        }

        let second = &model.requests()[1];
        assert_eq!(
            second.as_slice(),
            &[
                ChatMessage::system("sys"),
                ChatMessage::user("Who earns most?"),
                ChatMessage::assistant("David Brown"),
                ChatMessage::user("Which department?"),
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnected_consumer_stops_turn() {
        let (_dir, tools) = seeded_tools().await;
        let model = Arc::new(ScriptedModel::new());
        model.queue_text("nobody is listening");
        let agent = agent(model, tools);

        let (sink, rx) = EventSink::channel(8);
        drop(rx);

        let err = agent.respond("c1", "hello?", &sink).await.unwrap_err();
        assert!(matches!(err, TurnError::Disconnected(_)));

        let conversation = agent.memory().snapshot("c1").await.unwrap();
        assert_eq!(conversation.messages().last(), Some(&ChatMessage::user("hello?")));
    }
}
