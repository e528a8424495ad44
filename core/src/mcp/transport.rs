use crate::mcp::McpError;
use crate::mcp::protocol::{
    IncomingMessage, JsonRpcNotification, JsonRpcRequest, METHOD_NOT_FOUND, METHOD_PING,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Newline-delimited JSON-RPC over a pair of byte streams.
///
/// One request is in flight at a time; the lock is held from write until the
/// matching response is read.
pub struct StdioTransport {
    channel: Mutex<Channel>,
    next_id: AtomicU64,
}

struct Channel {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    // Partial line kept across cancelled reads.
    line: String,
}

impl StdioTransport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            channel: Mutex::new(Channel {
                reader: BufReader::new(Box::new(reader)),
                writer: Box::new(writer),
                line: String::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let mut channel = self.channel.lock().await;
        self.exchange(&mut channel, method, params).await
    }

    /// Like [`Self::request`], but only time spent on this request's own
    /// round trip counts; waiting for the channel behind other calls does not.
    pub async fn request_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let mut channel = self.channel.lock().await;
        tokio::time::timeout(timeout, self.exchange(&mut channel, method, params))
            .await
            .map_err(|_| McpError::Timeout(timeout))?
    }

    async fn exchange(
        &self,
        channel: &mut Channel,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        channel.send(&JsonRpcRequest::new(id, method, params)).await?;

        loop {
            let message = channel.receive().await?;

            if message.is_response_to(id) {
                if let Some(error) = message.error {
                    return Err(McpError::Rpc {
                        code: error.code,
                        message: error.message,
                    });
                }
                return Ok(message.result.unwrap_or(Value::Null));
            }

            if message.is_request() {
                channel.answer_server_request(message).await?;
            } else if let Some(method) = &message.method {
                debug!(method = %method, "provider notification");
            } else {
                debug!(id = ?message.id, "discarding response to an abandoned request");
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let mut channel = self.channel.lock().await;
        channel.send(&JsonRpcNotification::new(method, params)).await
    }

    /// Closes the write half so the provider sees EOF. Skipped when a request
    /// still holds the channel.
    pub async fn close_writer(&self) {
        if let Ok(mut channel) = self.channel.try_lock()
            && let Err(e) = channel.writer.shutdown().await
        {
            debug!(error = %e, "closing provider stdin failed");
        }
    }
}

impl Channel {
    async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), McpError> {
        let mut bytes = serde_json::to_vec(message)?;
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<IncomingMessage, McpError> {
        loop {
            let read = self.reader.read_line(&mut self.line).await?;
            if read == 0 {
                return Err(McpError::ProcessExited);
            }

            let line = std::mem::take(&mut self.line);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<IncomingMessage>(trimmed) {
                Ok(message) => return Ok(message),
                Err(e) => debug!(error = %e, line = %trimmed, "skipping non JSON-RPC output"),
            }
        }
    }

    async fn answer_server_request(&mut self, message: IncomingMessage) -> Result<(), McpError> {
        let id = message.id.unwrap_or(Value::Null);
        let reply = match message.method.as_deref() {
            Some(METHOD_PING) => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
            other => {
                debug!(method = ?other, "rejecting provider request");
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": METHOD_NOT_FOUND, "message": "method not supported by client"}
                })
            }
        };
        self.send(&reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    #[tokio::test]
    async fn request_skips_noise_and_answers_ping() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let transport = StdioTransport::new(client_read, client_write);

        let server = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server_io);
            let mut lines = BufReader::new(read).lines();

            let request: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(request["method"], "tools/list");
            let id = request["id"].clone();

            write.write_all(b"starting up...\n").await.unwrap();
            write
                .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n")
                .await
                .unwrap();
            write
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"s1\",\"method\":\"ping\"}\n")
                .await
                .unwrap();

            let pong: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(pong["id"], "s1");
            assert!(pong["result"].is_object());

            let reply = json!({"jsonrpc": "2.0", "id": id, "result": {"tools": []}});
            write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
        });

        let result = transport.request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"tools": []}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rpc_error_is_reported() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let transport = StdioTransport::new(client_read, client_write);

        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server_io);
            let mut lines = BufReader::new(read).lines();
            let request: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": -32602, "message": "Unknown tool: nope"}
            });
            write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
        });

        let err = transport.request("tools/call", Some(json!({"name": "nope"}))).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32602, .. }));
    }

    #[tokio::test]
    async fn late_reply_to_abandoned_request_is_skipped() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let transport = StdioTransport::new(client_read, client_write);

        let server = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server_io);
            let mut lines = BufReader::new(read).lines();
            let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

            for (request, answer) in [(&first, "stale"), (&second, "fresh")] {
                let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {"answer": answer}});
                write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
            }
        });

        let err = transport
            .request_timeout("tools/call", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));

        let result = transport.request("tools/call", None).await.unwrap();
        assert_eq!(result, json!({"answer": "fresh"}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn eof_means_process_exited() {
        let (client_io, server_io) = duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let transport = StdioTransport::new(client_read, client_write);
        drop(server_io);

        let err = transport.request("initialize", None).await.unwrap_err();
        assert!(matches!(err, McpError::ProcessExited | McpError::Io(_)));
    }
}
