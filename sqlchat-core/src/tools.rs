//! SQL tools exposed to the model.
//!
//! Tools never fail: store errors, bad arguments and unknown tool names all
//! come back as an `Error: ...` text result so the model can react to them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db;
use crate::models::{ToolCall, ToolResult};

pub const LIST_TABLES_TOOL: &str = "sql_db_list_tables";
pub const QUERY_TOOL: &str = "sql_db_query";

/// Describes a tool's interface to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: Value,
}

/// Text produced by a tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: format!("Error: {}", message),
            is_error: true,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, args: &Value) -> ToolOutput;
}

/// `sql_db_list_tables`: comma-separated table names.
pub struct ListTablesTool {
    pool: SqlitePool,
}

impl ListTablesTool {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: LIST_TABLES_TOOL.to_string(),
            description: "Input is an empty string, output is a comma-separated list of tables in the database."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
            }),
        }
    }

    async fn call(&self, _args: &Value) -> ToolOutput {
        match db::list_tables(&self.pool).await {
            Ok(tables) => ToolOutput::ok(tables.join(", ")),
            Err(e) => {
                tracing::warn!(error = %e, "list_tables failed");
                ToolOutput::error(e)
            }
        }
    }
}

/// `sql_db_query`: run one statement, return rows as a JSON array of arrays.
pub struct QueryTool {
    pool: SqlitePool,
}

impl QueryTool {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for QueryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: QUERY_TOOL.to_string(),
            description: "Input to this tool is a detailed and correct SQL query, output is a result from the database. \
If the query is not correct, an error message will be returned. \
If an error is returned, rewrite the query, check the query, and try again."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A detailed and correct SQL query."
                    }
                },
                "required": ["query"],
            }),
        }
    }

    async fn call(&self, args: &Value) -> ToolOutput {
        let statement = match args.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q,
            _ => return ToolOutput::error("missing 'query' argument"),
        };

        match db::execute(&self.pool, statement).await {
            Ok(result) => ToolOutput::ok(Value::from(result.rows).to_string()),
            Err(e) => {
                tracing::info!(error = %e, statement, "Query rejected by store");
                ToolOutput::error(e)
            }
        }
    }
}

/// Name-indexed set of tools available to the agent.
#[derive(Clone, Default)]
pub struct ToolBox {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// The two SQL tools bound to `pool`.
    pub fn sql(pool: SqlitePool) -> Self {
        let mut toolbox = Self::new();
        toolbox.register(Arc::new(ListTablesTool::new(pool.clone())));
        toolbox.register(Arc::new(QueryTool::new(pool)));
        toolbox
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let output = match self.tools.get(&call.name) {
            Some(tool) => tool.call(&call.args).await,
            None => ToolOutput::error(format!("Unknown tool {}", call.name)),
        };
        ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: output.content,
            is_error: output.is_error,
        }
    }
}
