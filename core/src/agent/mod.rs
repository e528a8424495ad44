pub mod catalog;
pub mod conversation;
pub mod loop_;
pub mod parser;
pub mod prompt;
pub mod registry;

pub use catalog::ToolCatalog;
pub use conversation::{Checkpoint, Conversation, Exchange};
pub use loop_::{AgentEvent, AgentLoop, RunOutcome};
pub use parser::{filter_known, parse_tool_uses, strip_tool_uses};
pub use prompt::{PromptComposer, compose};
pub use registry::{ConnectFailure, ConnectReport, SessionPool};
