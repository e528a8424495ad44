use std::time::Duration;
use thiserror::Error;

/// Failures talking to a tool provider.
///
/// During `connect` every variant is a transport failure that only removes
/// that provider from the catalog. During `invoke` the error is folded back
/// into the conversation as an error result.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON from provider: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("provider returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("session is closed")]
    Closed,

    #[error("provider process exited")]
    ProcessExited,
}

impl McpError {
    /// True for failures that leave the session unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::Io(_) | Self::Closed | Self::ProcessExited
        )
    }
}
