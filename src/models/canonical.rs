// Protocol-neutral request model shared by both public surfaces

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// Inline image, already base64 without a data-URI prefix.
    Image {
        media_type: String,
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Normalized JSON schema of the tool input; always an object schema.
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
}

/// A fully validated request, ready to be sent to the backend.
///
/// Built once per inbound call by the translator and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// Model name as the client sent it; echoed back in responses.
    pub model: String,
    /// Backend model id resolved from `model`.
    pub model_id: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub thinking_enabled: bool,
    pub thinking_budget: Option<u32>,
    pub stream: bool,
    pub params: GenerationParams,
}

impl CanonicalRequest {
    /// All text the request carries, used for token estimation.
    pub fn prompt_text(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            for part in &message.parts {
                match part {
                    ContentPart::Text { text } => out.push_str(text),
                    ContentPart::ToolUse { arguments, .. } => out.push_str(&arguments.to_string()),
                    ContentPart::ToolResult { content, .. } => out.push_str(content),
                    ContentPart::Image { .. } => {}
                }
            }
        }
        for tool in &self.tools {
            out.push_str(&tool.name);
            out.push_str(&tool.description);
            out.push_str(&tool.parameters.to_string());
        }
        out
    }
}
