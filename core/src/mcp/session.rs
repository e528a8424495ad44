use crate::config::ServerSpec;
use crate::mcp::McpError;
use crate::mcp::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListToolsResult,
    METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_LIST_TOOLS,
};
use crate::mcp::transport::StdioTransport;
use crate::traits::{ToolDescriptor, ToolInvocationResult, ToolSession};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One MCP client session with an external tool provider.
pub struct McpSession {
    name: String,
    transport: StdioTransport,
    child: Mutex<Option<Child>>,
    tools: Vec<ToolDescriptor>,
    timeout: Duration,
    closed: AtomicBool,
}

impl McpSession {
    /// Spawns the provider process, performs the handshake and lists its tools.
    pub async fn connect(spec: &ServerSpec, timeout: Duration) -> Result<Self, McpError> {
        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: spec.command.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return Err(McpError::Protocol("provider stdio was not captured".into()));
        };

        if let Some(stderr) = child.stderr.take() {
            let provider = spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(provider = %provider, "{}", line);
                }
            });
        }

        let transport = StdioTransport::new(stdout, stdin);
        Self::establish(spec.name.clone(), transport, Some(child), timeout).await
    }

    /// Runs the handshake over arbitrary byte streams, for providers that do
    /// not live in a child process.
    pub async fn from_streams<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
    ) -> Result<Self, McpError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = StdioTransport::new(reader, writer);
        Self::establish(name.into(), transport, None, DEFAULT_TIMEOUT).await
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn establish(
        name: String,
        transport: StdioTransport,
        mut child: Option<Child>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let handshake = tokio::time::timeout(timeout, handshake(&name, &transport))
            .await
            .unwrap_or(Err(McpError::Timeout(timeout)));

        match handshake {
            Ok(tools) => {
                info!(provider = %name, tools = tools.len(), "Tool provider connected");
                Ok(Self {
                    name,
                    transport,
                    child: Mutex::new(child),
                    tools,
                    timeout,
                    closed: AtomicBool::new(false),
                })
            }
            Err(e) => {
                if let Some(child) = child.as_mut()
                    && let Err(kill_err) = child.kill().await
                {
                    warn!(provider = %name, error = %kill_err, "Failed to kill provider after failed handshake");
                }
                Err(e)
            }
        }
    }
}

async fn handshake(name: &str, transport: &StdioTransport) -> Result<Vec<ToolDescriptor>, McpError> {
    let params = serde_json::to_value(InitializeParams::default())?;
    let init: InitializeResult =
        serde_json::from_value(transport.request(METHOD_INITIALIZE, Some(params)).await?)?;

    match &init.server_info {
        Some(server) => debug!(
            provider = %name,
            server = %server.name,
            version = %server.version,
            protocol = %init.protocol_version,
            "Provider initialized"
        ),
        None => debug!(provider = %name, protocol = %init.protocol_version, "Provider initialized"),
    }

    transport.notify(METHOD_INITIALIZED, None).await?;

    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let page: ListToolsResult =
            serde_json::from_value(transport.request(METHOD_LIST_TOOLS, params).await?)?;
        tools.extend(page.tools);

        match page.next_cursor {
            Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next)
            }
            _ => break,
        }
    }

    Ok(tools)
}

#[async_trait]
impl ToolSession for McpSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolInvocationResult, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }

        let params = serde_json::to_value(CallToolParams {
            name: tool_name,
            arguments,
        })?;

        let response = self
            .transport
            .request_timeout(METHOD_CALL_TOOL, Some(params), self.timeout)
            .await?;

        let result: CallToolResult = serde_json::from_value(response)?;
        Ok(ToolInvocationResult {
            tool_name: tool_name.to_string(),
            content: result.content,
            is_error: result.is_error,
        })
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.transport.close_writer().await;

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(provider = %self.name, %status, "Provider exited"),
            _ => {
                if let Err(e) = child.kill().await {
                    warn!(provider = %self.name, error = %e, "Failed to kill provider process");
                } else {
                    info!(provider = %self.name, "Provider process killed");
                }
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
