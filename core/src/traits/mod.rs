pub mod provider;
pub mod session;
pub mod tool;

pub use provider::{ChatMessage, ChatRequest, ChatResponse, Provider, ProviderEvent, Role};
pub use session::ToolSession;
pub use tool::{ContentBlock, ToolDescriptor, ToolInvocationRequest, ToolInvocationResult};
