//! OpenAI-compatible chat-completions client with streaming tool calls.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use super::sse::{ChunkAccumulator, SseDecoder};
use super::{ChatModel, ModelDelta, ModelError, ModelStream};
use crate::config::ModelConfig;
use crate::models::ChatMessage;
use crate::tools::ToolDefinition;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Longest silence allowed between response reads; a long answer may
    /// stream for longer than this as long as bytes keep arriving.
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl OpenAiConfig {
    pub fn from_model_config(config: &ModelConfig, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_seconds),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiConfig) -> Result<Self, ModelError> {
        if config.api_key.is_empty() {
            return Err(ModelError::MissingApiKey);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages.iter().map(message_to_openai).collect::<Vec<_>>(),
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools.iter().map(tool_to_openai).collect::<Vec<_>>());
        }
        body
    }

    /// Send the request, retrying transient failures with jittered backoff.
    async fn open(&self, body: &Value) -> Result<Response, ModelError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.open_once(body),
            |e: &ModelError| {
                let transient = e.is_transient();
                if transient {
                    tracing::warn!(error = %e, "Model request failed, retrying");
                }
                transient
            },
        )
        .await;

        match result {
            Ok(response) => Ok(response),
            Err(e) if e.is_transient() => {
                let attempts = self.config.max_retries + 1;
                tracing::error!(attempts, error = %e, "All model retry attempts failed");
                Err(ModelError::RetryExhausted {
                    attempts,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn open_once(&self, body: &Value) -> Result<Response, ModelError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&error_body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or(error_body);

        tracing::error!(code = status.as_u16(), message = %message, "Chat completions API error");

        Err(match status.as_u16() {
            401 | 403 => ModelError::Auth,
            429 => ModelError::RateLimited,
            code => ModelError::Api {
                status: code,
                message,
            },
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelStream, ModelError> {
        let body = self.request_body(messages, tools);
        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "Starting chat completion stream"
        );

        let response = self.open(&body).await?;
        Ok(delta_stream(response.bytes_stream()))
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct StreamState {
    bytes: ByteStream,
    decoder: SseDecoder,
    accumulator: ChunkAccumulator,
    pending: VecDeque<Result<ModelDelta, ModelError>>,
    finished: bool,
}

impl StreamState {
    fn accept(&mut self, payload: &str) {
        match self.accumulator.accept(payload) {
            Ok(deltas) => self.pending.extend(deltas.into_iter().map(Ok)),
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

fn delta_stream(
    bytes: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> ModelStream {
    let state = StreamState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        accumulator: ChunkAccumulator::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for payload in state.decoder.push(&chunk) {
                        state.accept(&payload);
                        if state.finished {
                            break;
                        }
                    }
                    if state.accumulator.is_done() {
                        state.finished = true;
                    }
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(ModelError::Stream(e.to_string())));
                    state.finished = true;
                }
                None => {
                    if let Some(payload) = state.decoder.finish() {
                        state.accept(&payload);
                    }
                    let tail = state.accumulator.finish();
                    state.pending.extend(tail.into_iter().map(Ok));
                    state.finished = true;
                }
            }
        }
    }))
}

fn message_to_openai(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({"role": "system", "content": content}),
        ChatMessage::User { content } => json!({"role": "user", "content": content}),
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut value = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                value["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.args.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            value
        }
        ChatMessage::Tool(result) => json!({
            "role": "tool",
            "tool_call_id": result.tool_call_id,
            "content": result.content,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}
