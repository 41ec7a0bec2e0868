// Anthropic messages request → canonical request

use super::{image_from_base64, resolve_model, tools};
use crate::error::{ProxyError, Result};
use crate::models::anthropic::{ContentBlock, ImageSource, MessageContent, MessagesRequest};
use crate::models::canonical::{
    CanonicalRequest, ContentPart, GenerationParams, Message, Role,
};
use tracing::debug;

pub(super) fn translate(req: MessagesRequest) -> Result<CanonicalRequest> {
    let model_id = resolve_model(&req.model)?;

    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = &req.system {
        let text = system.to_text();
        if !text.trim().is_empty() {
            messages.push(Message {
                role: Role::System,
                parts: vec![ContentPart::text(text)],
            });
        }
    }

    for (i, message) in req.messages.into_iter().enumerate() {
        let role = match message.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(ProxyError::Validation(format!(
                    "messages[{}] has unknown role '{}'",
                    i, other
                )))
            }
        };

        let parts = match message.content {
            MessageContent::Text(text) => vec![ContentPart::Text { text }],
            MessageContent::Blocks(blocks) => translate_blocks(i, blocks)?,
        };

        messages.push(Message { role, parts });
    }

    let tools = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|tool| {
            if tool.input_schema.is_none() {
                return Err(ProxyError::Validation(format!(
                    "tool '{}' has no input_schema; server tools are not supported",
                    tool.name
                )));
            }
            tools::build_tool(&tool.name, tool.description.as_deref(), tool.input_schema)
        })
        .collect::<Result<Vec<_>>>()?;

    let (thinking_enabled, thinking_budget) = match &req.thinking {
        Some(thinking) if thinking.is_enabled() => (true, thinking.budget_tokens),
        _ => (false, None),
    };

    Ok(CanonicalRequest {
        model: req.model,
        model_id,
        messages,
        tools,
        thinking_enabled,
        thinking_budget,
        stream: req.stream.unwrap_or(false),
        params: GenerationParams {
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop: req.stop_sequences.unwrap_or_default(),
        },
    })
}

fn translate_blocks(index: usize, blocks: Vec<ContentBlock>) -> Result<Vec<ContentPart>> {
    let mut parts = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } => parts.push(ContentPart::Text { text }),
            ContentBlock::Image { source, .. } => parts.push(translate_image(source)?),
            ContentBlock::ToolUse { id, name, input, .. } => parts.push(ContentPart::ToolUse {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => parts.push(ContentPart::ToolResult {
                tool_use_id,
                content: content.map(|c| c.to_string()).unwrap_or_default(),
                is_error: is_error.unwrap_or(false),
            }),
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {
                debug!("Dropping thinking block from messages[{}] history", index);
            }
        }
    }

    // A message made only of thinking blocks still occupies its turn.
    if parts.is_empty() {
        parts.push(ContentPart::text(String::new()));
    }

    Ok(parts)
}

fn translate_image(source: ImageSource) -> Result<ContentPart> {
    match source {
        ImageSource::Base64 { media_type, data } => {
            let media_type = media_type.unwrap_or_else(|| "image/png".to_string());
            image_from_base64(&media_type, &data)
        }
        ImageSource::Url { .. } => Err(ProxyError::Validation(
            "URL image sources are not supported; send base64 data".to_string(),
        )),
    }
}
