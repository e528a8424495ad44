use crate::agent::ToolCatalog;
use crate::config::ServerSpec;
use crate::mcp::{McpError, McpSession};
use crate::traits::{ToolInvocationRequest, ToolInvocationResult, ToolSession};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// A provider that could not be connected.
#[derive(Debug)]
pub struct ConnectFailure {
    pub provider: String,
    pub error: McpError,
}

#[derive(Debug, Default)]
pub struct ConnectReport {
    pub connected: usize,
    pub failures: Vec<ConnectFailure>,
}

impl ConnectReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns every provider session and routes tool calls to them.
///
/// Sessions are kept in acquisition order and released in reverse.
pub struct SessionPool {
    specs: Vec<ServerSpec>,
    sessions: Vec<Arc<dyn ToolSession>>,
    catalog: ToolCatalog,
    timeout: Duration,
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPool {
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            sessions: Vec::new(),
            catalog: ToolCatalog::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Remembers a provider; nothing is launched until [`Self::connect_all`].
    pub fn register(&mut self, spec: ServerSpec) {
        self.specs.push(spec);
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Connects every registered provider and rebuilds the catalog. A provider
    /// that fails to start is logged, reported and left out.
    pub async fn connect_all(&mut self) -> ConnectReport {
        self.close_all().await;

        let mut report = ConnectReport::default();
        for spec in self.specs.clone() {
            match McpSession::connect(&spec, self.timeout).await {
                Ok(session) => {
                    self.add_session(Arc::new(session));
                    report.connected += 1;
                }
                Err(error) => {
                    warn!(provider = %spec.name, command = %spec.command, error = %error, "Tool provider unavailable");
                    report.failures.push(ConnectFailure {
                        provider: spec.name.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            connected = report.connected,
            failed = report.failures.len(),
            tools = self.catalog.len(),
            "Tool providers ready"
        );
        report
    }

    /// Adds a session that is already connected.
    pub fn attach(&mut self, session: Arc<dyn ToolSession>) {
        self.add_session(session);
    }

    fn add_session(&mut self, session: Arc<dyn ToolSession>) {
        let owner = self.sessions.len();
        for tool in session.tools() {
            if !self.catalog.insert(tool.clone(), owner) {
                let existing = self
                    .catalog
                    .owner_of(&tool.name)
                    .and_then(|i| self.sessions.get(i))
                    .map(|s| s.name().to_string())
                    .unwrap_or_default();
                warn!(
                    tool = %tool.name,
                    kept = %existing,
                    skipped = %session.name(),
                    "Duplicate tool name, keeping the first provider's tool"
                );
            }
        }
        self.sessions.push(session);
    }

    /// Runs the requests concurrently. Results come back in request order;
    /// requests naming unknown tools produce no result.
    pub async fn dispatch(&self, requests: &[ToolInvocationRequest]) -> Vec<ToolInvocationResult> {
        let calls = requests.iter().filter_map(|request| {
            let Some(session) = self
                .catalog
                .owner_of(&request.tool_name)
                .and_then(|i| self.sessions.get(i))
            else {
                debug!(tool = %request.tool_name, "Skipping call to unknown tool");
                return None;
            };
            Some(Self::invoke(session.clone(), request))
        });

        join_all(calls).await
    }

    async fn invoke(
        session: Arc<dyn ToolSession>,
        request: &ToolInvocationRequest,
    ) -> ToolInvocationResult {
        info!(
            provider = %session.name(),
            tool = %request.tool_name,
            arguments = %request.arguments,
            "Calling tool"
        );

        match session
            .invoke(&request.tool_name, request.arguments.clone())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %request.tool_name, error = %e, "Tool call failed");
                ToolInvocationResult::error(
                    &request.tool_name,
                    format!("Tool '{}' failed: {}", request.tool_name, e),
                )
            }
        }
    }

    /// Releases every session, newest first, and empties the catalog.
    pub async fn close_all(&mut self) {
        self.catalog.clear();
        while let Some(session) = self.sessions.pop() {
            debug!(provider = %session.name(), "Closing tool provider");
            session.close().await;
        }
    }
}
