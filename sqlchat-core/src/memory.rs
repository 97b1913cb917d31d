//! Process-wide conversation memory keyed by conversation id.
//!
//! A conversation is created on its first message and retained until the
//! process exits or it is evicted. Each conversation sits behind its own async
//! lock, so turns on the same id run one after another and history is only
//! ever appended.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::models::ChatMessage;

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, system_prompt: &str) -> Self {
        let now = Utc::now();
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        Self {
            id: id.into(),
            created_at: now,
            last_active_at: now,
            messages,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.last_active_at = Utc::now();
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
        self.last_active_at = Utc::now();
    }

    /// Messages excluding the system prompt.
    pub fn turn_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| !matches!(m, ChatMessage::System { .. }))
            .count()
    }
}

pub type ConversationHandle = Arc<Mutex<Conversation>>;

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, ConversationHandle>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing conversation for `id`, or a new one seeded with `system_prompt`.
    pub async fn get_or_create(&self, id: &str, system_prompt: &str) -> ConversationHandle {
        if let Some(handle) = self.conversations.read().await.get(id) {
            return handle.clone();
        }

        let mut conversations = self.conversations.write().await;
        conversations
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(conversation_id = id, "Creating conversation");
                Arc::new(Mutex::new(Conversation::new(id, system_prompt)))
            })
            .clone()
    }

    pub async fn get(&self, id: &str) -> Option<ConversationHandle> {
        self.conversations.read().await.get(id).cloned()
    }

    /// Point-in-time copy of a conversation's history.
    ///
    /// Waits for any in-flight turn on that conversation to finish.
    pub async fn snapshot(&self, id: &str) -> Option<Conversation> {
        let handle = self.get(id).await?;
        let conversation = handle.lock().await;
        Some(conversation.clone())
    }

    /// Forget a conversation. Returns whether it existed.
    pub async fn evict(&self, id: &str) -> bool {
        self.conversations.write().await.remove(id).is_some()
    }

    pub async fn clear(&self) {
        self.conversations.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}
