pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod memory;
pub mod model;
pub mod models;
pub mod tools;

pub use agent::{Agent, TurnError};
pub use config::SqlChatConfig;
pub use error::SqlChatError;
pub use events::{ChatEvent, Disconnected, EventSink};
pub use memory::{Conversation, ConversationStore};
pub use model::{ChatModel, ModelDelta, ModelError, OpenAiChatModel, OpenAiConfig};
pub use tools::{Tool, ToolBox, ToolDefinition};
