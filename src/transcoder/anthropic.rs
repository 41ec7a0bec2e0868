// Anthropic messages rendering: SSE events and the aggregated body

use super::{BlockKind, CompletedBlock, CompletedMessage, OutputChunk, ResponseContext, Step, StepDelta};
use crate::models::anthropic::{ContentBlock, MessagesResponse, Usage};
use crate::models::streaming::{
    ContentBlockStart, Delta, DeltaUsage, ErrorData, MessageDeltaData, MessageStart, StreamEvent,
};
use serde_json::{json, Value};
use tracing::warn;

pub struct EventEncoder {
    ctx: ResponseContext,
}

impl EventEncoder {
    pub fn new(ctx: ResponseContext) -> Self {
        Self { ctx }
    }

    pub fn encode(&mut self, step: &Step) -> Vec<OutputChunk> {
        let events = match step {
            Step::Start => vec![StreamEvent::MessageStart {
                message: MessageStart {
                    id: self.ctx.id.clone(),
                    message_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.ctx.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage {
                        input_tokens: self.ctx.input_tokens,
                        output_tokens: 0,
                    },
                },
            }],
            Step::BlockStart { index, kind } => vec![StreamEvent::ContentBlockStart {
                index: *index,
                content_block: match kind {
                    BlockKind::Text => ContentBlockStart::Text {
                        text: String::new(),
                    },
                    BlockKind::Thinking => ContentBlockStart::Thinking {
                        thinking: String::new(),
                    },
                    BlockKind::ToolUse { id, name, .. } => ContentBlockStart::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: json!({}),
                    },
                },
            }],
            Step::BlockDelta { index, delta } => vec![StreamEvent::ContentBlockDelta {
                index: *index,
                delta: match delta {
                    StepDelta::Text(text) => Delta::TextDelta { text: text.clone() },
                    StepDelta::Thinking(text) => Delta::ThinkingDelta {
                        thinking: text.clone(),
                    },
                    StepDelta::ToolArguments { fragment, .. } => Delta::InputJsonDelta {
                        partial_json: fragment.clone(),
                    },
                },
            }],
            Step::BlockStop { index } => vec![StreamEvent::ContentBlockStop { index: *index }],
            Step::Finish {
                reason,
                stop_sequence,
                usage,
            } => vec![
                StreamEvent::MessageDelta {
                    delta: MessageDeltaData {
                        stop_reason: Some(reason.anthropic().to_string()),
                        stop_sequence: stop_sequence.clone(),
                    },
                    usage: DeltaUsage {
                        output_tokens: usage.output_tokens,
                    },
                },
                StreamEvent::MessageStop,
            ],
            Step::Error { kind, message } => vec![StreamEvent::Error {
                error: ErrorData {
                    error_type: kind.anthropic_type().to_string(),
                    message: message.clone(),
                },
            }],
        };

        events.into_iter().map(OutputChunk::Event).collect()
    }
}

/// Non-streaming `message` body.
pub fn render_response(message: &CompletedMessage, ctx: &ResponseContext) -> MessagesResponse {
    let content = message
        .blocks
        .iter()
        .map(|block| match block {
            CompletedBlock::Text(text) => ContentBlock::Text {
                text: text.clone(),
                cache_control: None,
            },
            CompletedBlock::Thinking(thinking) => ContentBlock::Thinking {
                thinking: thinking.clone(),
                signature: None,
            },
            CompletedBlock::ToolUse {
                id,
                name,
                arguments,
            } => ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: tool_input(id, arguments),
                cache_control: None,
            },
        })
        .collect();

    MessagesResponse {
        id: ctx.id.clone(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: ctx.model.clone(),
        stop_reason: Some(message.finish.anthropic().to_string()),
        stop_sequence: message.stop_sequence.clone(),
        usage: message.usage.clone(),
    }
}

fn tool_input(id: &str, arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str(arguments) {
        Ok(value) => value,
        Err(e) => {
            warn!("Tool call {} produced invalid JSON arguments: {}", id, e);
            Value::String(arguments.to_string())
        }
    }
}
