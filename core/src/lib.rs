pub mod agent;
pub mod config;
pub mod mcp;
pub mod providers;
pub mod traits;

pub use agent::{AgentEvent, AgentLoop, Conversation, PromptComposer, SessionPool, ToolCatalog};
pub use config::*;
pub use mcp::{McpError, McpSession};
pub use providers::*;
pub use traits::*;
