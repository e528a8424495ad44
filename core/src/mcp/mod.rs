//! Client side of the Model Context Protocol over stdio.

pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::McpError;
pub use session::McpSession;
pub use transport::StdioTransport;
