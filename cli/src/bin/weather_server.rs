//! Demo MCP tool provider speaking JSON-RPC over stdin/stdout.
//!
//! Register it as a server with `command = "mcpilot-weather"` to try tool
//! calls without any external dependency.

use anyhow::Result;
use mcpilot_core::mcp::protocol::{
    JSONRPC_VERSION, METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_LIST_TOOLS, METHOD_NOT_FOUND,
    METHOD_PING, PROTOCOL_VERSION,
};
use mcpilot_core::{ContentBlock, ToolDescriptor};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const SERVER_NAME: &str = "weather";
const INVALID_PARAMS: i64 = -32602;
const CITIES: &[&str] = &["Paris", "London", "Tokyo", "New York", "Sydney"];

#[derive(Debug, Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

type Reply = std::result::Result<Value, (i64, String)>;

fn tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "get_weather",
            "Get the weather in a given city",
            json!({
                "type": "object",
                "properties": {"city": {"type": "string", "description": "City name"}},
                "required": ["city"]
            }),
        ),
        ToolDescriptor::new(
            "list_cities",
            "List cities with known weather",
            json!({"type": "object", "properties": {}}),
        ),
    ]
}

fn text_result(text: impl Into<String>, is_error: bool) -> Value {
    json!({
        "content": [ContentBlock::text(text)],
        "isError": is_error,
    })
}

fn call_tool(params: &Value) -> Reply {
    let name = params["name"].as_str().unwrap_or_default();
    let arguments = &params["arguments"];

    match name {
        "get_weather" => match arguments["city"].as_str().map(str::trim) {
            Some(city) if !city.is_empty() => {
                Ok(text_result(format!("The weather in {city} is sunny"), false))
            }
            _ => Ok(text_result("Missing required argument: city", true)),
        },
        "list_cities" => Ok(text_result(CITIES.join(", "), false)),
        _ => Err((INVALID_PARAMS, format!("Unknown tool: {name}"))),
    }
}

fn handle(method: &str, params: &Value) -> Reply {
    match method {
        METHOD_INITIALIZE => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
        })),
        METHOD_LIST_TOOLS => Ok(json!({ "tools": tools() })),
        METHOD_CALL_TOOL => call_tool(params),
        METHOD_PING => Ok(json!({})),
        other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
    }
}

fn response(id: Value, reply: Reply) -> Value {
    match reply {
        Ok(result) => json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result}),
        Err((code, message)) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": {"code": code, "message": message},
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, so logs must stay on stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let message: Incoming = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed message");
                continue;
            }
        };

        let Some(id) = message.id else {
            debug!(method = %message.method, "Notification");
            continue;
        };

        let reply = handle(&message.method, &message.params);
        let mut out = serde_json::to_string(&response(id, reply))?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
