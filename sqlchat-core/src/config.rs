use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::SqlChatError;

/// System prompt handed to the model at the start of every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that interacts with a SQL database. \
The database is named 'company.db' and contains a table named 'Employees'. \
The 'Employees' table has the following columns: id (INTEGER, PRIMARY KEY), Name (TEXT), Age (INTEGER), \
Department (TEXT), Salary (REAL), Mobile (TEXT), Email (TEXT). \
Given a user's question, you must first decide if you need to query the database. \
If you need to query, you can use `sql_db_list_tables` to see tables, and then `sql_db_query` to get the answer. \
You must generate the SQL query yourself. Only query the columns necessary to answer the question. \
After you receive the SQL result, you must answer the user's original question in plain, natural language. \
If the question is not about the database, answer it as a general AI assistant.";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SqlChatConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
    /// Environment variable holding the model provider credential.
    pub api_key_env: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://company.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 1024,
            timeout_seconds: 60,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on model invocations per user message.
    pub max_iterations: usize,
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Capacity of the per-request event channel.
    pub stream_buffer: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            stream_buffer: 16,
        }
    }
}

impl SqlChatConfig {
    /// Load from a TOML file (optional) layered with `SQLCHAT__SECTION__KEY`
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("SQLCHAT").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    /// Model credential from the variable named by `service.api_key_env`.
    pub fn api_key(&self) -> Result<String, SqlChatError> {
        match std::env::var(&self.service.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(SqlChatError::MissingApiKey(
                self.service.api_key_env.clone(),
            )),
        }
    }
}
