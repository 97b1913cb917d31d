//! Chat-completion model boundary.
//!
//! The agent only sees [`ChatModel`]: given the full history and the tool
//! definitions, a model returns a stream of [`ModelDelta`]s made of answer text
//! fragments and complete tool-call requests.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

use crate::models::{ChatMessage, ToolCall};
use crate::tools::ToolDefinition;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod openai;
pub mod sse;

pub use openai::{OpenAiChatModel, OpenAiConfig};

/// Incremental output of one model invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDelta {
    /// A fragment of assistant text, in order
    Text(String),
    /// A fully assembled tool-call request
    ToolCall(ToolCall),
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelDelta, ModelError>> + Send>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelStream, ModelError>;

    /// Model name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by model provider")]
    RateLimited,

    #[error("Authentication with model provider failed")]
    Auth,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("All {attempts} retry attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl ModelError {
    /// Whether a fresh attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Network(_) | ModelError::RateLimited => true,
            ModelError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
