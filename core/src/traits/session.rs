use crate::mcp::McpError;
use crate::traits::{ToolDescriptor, ToolInvocationResult};
use async_trait::async_trait;
use serde_json::Value;

/// A connected tool provider. Implemented by [`crate::mcp::McpSession`] for
/// stdio processes; anything else that can list and run tools can be attached
/// to a [`crate::agent::SessionPool`] the same way.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Provider name used in logs and startup warnings.
    fn name(&self) -> &str;

    /// Tools declared during the handshake, in listing order.
    fn tools(&self) -> &[ToolDescriptor];

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolInvocationResult, McpError>;

    /// Releases the provider. Safe to call more than once.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}
