// OpenAI chat completion request → canonical request

use super::{image_from_data_uri, parse_arguments, resolve_model, tools};
use crate::error::{ProxyError, Result};
use crate::models::canonical::{
    CanonicalRequest, ContentPart, GenerationParams, Message, Role,
};
use crate::models::openai::{ChatCompletionRequest, ChatContent, ChatMessage, ContentPart as WirePart};

/// Thinking budget implied by each `reasoning_effort` level.
fn effort_budget(effort: &str) -> Option<u32> {
    match effort {
        "minimal" | "low" => Some(4_000),
        "medium" => Some(10_000),
        "high" => Some(24_000),
        _ => None,
    }
}

pub(super) fn translate(req: ChatCompletionRequest) -> Result<CanonicalRequest> {
    let model_id = resolve_model(&req.model)?;

    let messages = req
        .messages
        .into_iter()
        .enumerate()
        .map(|(i, message)| translate_message(i, message))
        .collect::<Result<Vec<_>>>()?;

    let tools = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|tool| {
            if tool.tool_type != "function" {
                return Err(ProxyError::Validation(format!(
                    "unsupported tool type '{}'",
                    tool.tool_type
                )));
            }
            tools::build_tool(
                &tool.function.name,
                tool.function.description.as_deref(),
                tool.function.parameters,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let (thinking_enabled, thinking_budget) = match (&req.thinking, &req.reasoning_effort) {
        (Some(thinking), _) => (thinking.is_enabled(), thinking.budget_tokens),
        (None, Some(effort)) => {
            let budget = effort_budget(effort.as_str());
            (budget.is_some(), budget)
        }
        (None, None) => (false, None),
    };

    Ok(CanonicalRequest {
        model: req.model,
        model_id,
        messages,
        tools,
        thinking_enabled,
        thinking_budget: if thinking_enabled { thinking_budget } else { None },
        stream: req.stream.unwrap_or(false),
        params: GenerationParams {
            max_tokens: req.max_completion_tokens.or(req.max_tokens),
            temperature: req.temperature,
            top_p: req.top_p,
            stop: req.stop.map(|s| s.into_vec()).unwrap_or_default(),
        },
    })
}

fn translate_message(index: usize, message: ChatMessage) -> Result<Message> {
    let role = match message.role.as_str() {
        "system" | "developer" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        other => {
            return Err(ProxyError::Validation(format!(
                "messages[{}] has unknown role '{}'",
                index, other
            )))
        }
    };

    if role == Role::Tool {
        let tool_use_id = message.tool_call_id.ok_or_else(|| {
            ProxyError::Validation(format!("messages[{}] is a tool message without tool_call_id", index))
        })?;
        let content = match message.content {
            Some(content) => content_text(content),
            None => String::new(),
        };
        return Ok(Message {
            role,
            parts: vec![ContentPart::ToolResult {
                tool_use_id,
                content,
                is_error: false,
            }],
        });
    }

    let mut parts = match message.content {
        Some(ChatContent::Text(text)) => vec![ContentPart::Text { text }],
        Some(ChatContent::Parts(wire_parts)) => wire_parts
            .into_iter()
            .map(|part| match part {
                WirePart::Text { text } => Ok(ContentPart::Text { text }),
                WirePart::ImageUrl { image_url } => image_from_data_uri(&image_url.url),
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    if let Some(tool_calls) = message.tool_calls {
        if role != Role::Assistant {
            return Err(ProxyError::Validation(format!(
                "messages[{}]: only assistant messages may carry tool_calls",
                index
            )));
        }
        for call in tool_calls {
            parts.push(ContentPart::ToolUse {
                id: call.id,
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments)?,
            });
        }
    }

    Ok(Message { role, parts })
}

fn content_text(content: ChatContent) -> String {
    match content {
        ChatContent::Text(text) => text,
        ChatContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                WirePart::Text { text } => Some(text),
                WirePart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
