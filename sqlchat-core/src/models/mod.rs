pub mod employee;
pub mod message;

pub use employee::{SeedEmployee, SEED_EMPLOYEES};
pub use message::{ChatMessage, ToolCall, ToolResult};
