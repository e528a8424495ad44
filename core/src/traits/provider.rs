use crate::traits::ToolInvocationResult;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn. Tool result turns keep the structured results next
/// to the text rendering that is actually sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolInvocationResult>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_results: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_results: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_results: None,
        }
    }

    pub fn tool_results(results: Vec<ToolInvocationResult>) -> Self {
        Self {
            role: Role::User,
            content: render_tool_results(&results),
            tool_results: Some(results),
        }
    }

    pub fn is_tool_results(&self) -> bool {
        self.tool_results.is_some()
    }
}

fn render_tool_results(results: &[ToolInvocationResult]) -> String {
    if results.is_empty() {
        return "No tool was executed: none of the requested tools are available. \
                Answer with the tools listed in your instructions or without tools."
            .to_string();
    }

    let mut out = String::new();
    for result in results {
        let tag = if result.is_error { "error" } else { "result" };
        let _ = writeln!(
            out,
            "<tool_use_result>\n  <name>{}</name>\n  <{tag}>{}</{tag}>\n</tool_use_result>",
            result.tool_name,
            result.text()
        );
    }
    out.trim_end().to_string()
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: Option<String>,
}

impl ChatResponse {
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Token(String),
    Error(String),
    Done,
}

/// Text completion service the agent talks to.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse>;

    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
    ) -> anyhow::Result<BoxStream<'static, ProviderEvent>>;

    fn supports_streaming(&self) -> bool {
        true
    }
}
