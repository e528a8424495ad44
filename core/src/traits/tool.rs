use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool as declared by a provider's `tools/list` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// One tool call extracted from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationRequest {
    pub tool_name: String,
    pub arguments: Value,
}

impl ToolInvocationRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Plain-text view used when the block is fed back to the model.
    pub fn render(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { mime_type, .. } => format!("[image: {mime_type}]"),
            Self::Audio { mime_type, .. } => format!("[audio: {mime_type}]"),
            Self::Resource { resource } => match resource.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => resource.to_string(),
            },
            Self::Unknown => "[unsupported content]".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub tool_name: String,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolInvocationResult {
    pub fn success(tool_name: impl Into<String>, content: Vec<ContentBlock>) -> Self {
        Self {
            tool_name: tool_name.into(),
            content,
            is_error: false,
        }
    }

    pub fn error(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            content: vec![ContentBlock::text(error)],
            is_error: true,
        }
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(ContentBlock::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_reads_mcp_listing_entry() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "get_weather",
            "inputSchema": {"type": "object", "properties": {"city": {"type": "string"}}}
        }))
        .unwrap();

        assert_eq!(tool.name, "get_weather");
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["properties"]["city"]["type"], "string");
    }

    #[test]
    fn content_blocks_keep_unknown_types() {
        let blocks: Vec<ContentBlock> = serde_json::from_value(json!([
            {"type": "text", "text": "sunny"},
            {"type": "image", "data": "aGk=", "mimeType": "image/png"},
            {"type": "resource_link", "uri": "file:///tmp/x"}
        ]))
        .unwrap();

        assert_eq!(blocks[0], ContentBlock::text("sunny"));
        assert_eq!(blocks[1].render(), "[image: image/png]");
        assert_eq!(blocks[2], ContentBlock::Unknown);
    }

    #[test]
    fn result_text_joins_blocks() {
        let result = ToolInvocationResult::success(
            "get_weather",
            vec![ContentBlock::text("sunny"), ContentBlock::text("22C")],
        );
        assert_eq!(result.text(), "sunny\n22C");
        assert!(!result.is_error);
        assert!(ToolInvocationResult::error("x", "boom").is_error);
    }
}
