// OpenAI chat.completion rendering: streamed chunks and the aggregated body

use super::{BlockKind, CompletedBlock, CompletedMessage, OutputChunk, ResponseContext, Step, StepDelta};
use crate::error::error_body;
use crate::models::openai::{
    ChatCompletionChunk, ChatCompletionResponse, Choice, ChunkChoice, ChunkDelta, CompletionUsage,
    FunctionCall, FunctionCallChunk, ResponseMessage, ToolCall, ToolCallChunk,
};
use crate::models::Protocol;

pub struct ChunkEncoder {
    ctx: ResponseContext,
    include_usage: bool,
}

impl ChunkEncoder {
    pub fn new(ctx: ResponseContext, include_usage: bool) -> Self {
        Self { ctx, include_usage }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> OutputChunk {
        OutputChunk::Completion(ChatCompletionChunk {
            id: self.ctx.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.ctx.created,
            model: self.ctx.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        })
    }

    pub fn encode(&mut self, step: &Step) -> Vec<OutputChunk> {
        match step {
            Step::Start => vec![self.chunk(
                ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: Some(String::new()),
                    ..Default::default()
                },
                None,
            )],
            Step::BlockStart {
                kind:
                    BlockKind::ToolUse {
                        id,
                        name,
                        tool_index,
                    },
                ..
            } => vec![self.chunk(
                ChunkDelta {
                    tool_calls: Some(vec![ToolCallChunk {
                        index: *tool_index,
                        id: Some(id.clone()),
                        tool_type: Some("function".to_string()),
                        function: FunctionCallChunk {
                            name: Some(name.clone()),
                            arguments: Some(String::new()),
                        },
                    }]),
                    ..Default::default()
                },
                None,
            )],
            Step::BlockStart { .. } | Step::BlockStop { .. } => Vec::new(),
            Step::BlockDelta { delta, .. } => {
                let delta = match delta {
                    StepDelta::Text(text) => ChunkDelta {
                        content: Some(text.clone()),
                        ..Default::default()
                    },
                    StepDelta::Thinking(text) => ChunkDelta {
                        reasoning_content: Some(text.clone()),
                        ..Default::default()
                    },
                    StepDelta::ToolArguments {
                        tool_index,
                        fragment,
                    } => ChunkDelta {
                        tool_calls: Some(vec![ToolCallChunk {
                            index: *tool_index,
                            id: None,
                            tool_type: None,
                            function: FunctionCallChunk {
                                name: None,
                                arguments: Some(fragment.clone()),
                            },
                        }]),
                        ..Default::default()
                    },
                };
                vec![self.chunk(delta, None)]
            }
            Step::Finish { reason, usage, .. } => {
                let mut chunks = vec![self.chunk(
                    ChunkDelta::default(),
                    Some(reason.openai().to_string()),
                )];
                if self.include_usage {
                    chunks.push(OutputChunk::Completion(ChatCompletionChunk {
                        id: self.ctx.id.clone(),
                        object: "chat.completion.chunk".to_string(),
                        created: self.ctx.created,
                        model: self.ctx.model.clone(),
                        choices: Vec::new(),
                        usage: Some(CompletionUsage::new(usage.input_tokens, usage.output_tokens)),
                    }));
                }
                chunks.push(OutputChunk::Done);
                chunks
            }
            // No [DONE] after an error: clients must see the stream as failed.
            Step::Error { kind, message } => vec![OutputChunk::CompletionError(error_body(
                Protocol::OpenAi,
                *kind,
                message,
            ))],
        }
    }
}

/// Non-streaming `chat.completion` body.
pub fn render_response(message: &CompletedMessage, ctx: &ResponseContext) -> ChatCompletionResponse {
    let tool_calls: Vec<ToolCall> = message
        .blocks
        .iter()
        .filter_map(|block| match block {
            CompletedBlock::ToolUse {
                id,
                name,
                arguments,
            } => Some(ToolCall {
                id: id.clone(),
                tool_type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: if arguments.is_empty() {
                        "{}".to_string()
                    } else {
                        arguments.clone()
                    },
                },
            }),
            _ => None,
        })
        .collect();

    let text = message.text();
    let thinking = message.thinking();

    ChatCompletionResponse {
        id: ctx.id.clone(),
        object: "chat.completion".to_string(),
        created: ctx.created,
        model: ctx.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(text)
                },
                reasoning_content: (!thinking.is_empty()).then_some(thinking),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(message.finish.openai().to_string()),
        }],
        usage: CompletionUsage::new(message.usage.input_tokens, message.usage.output_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::anthropic::Usage;
    use crate::transcoder::FinishReason;

    fn encoder(include_usage: bool) -> ChunkEncoder {
        ChunkEncoder::new(
            ResponseContext::new(Protocol::OpenAi, "claude-sonnet-4.5", 5),
            include_usage,
        )
    }

    fn sse(chunks: &[OutputChunk]) -> String {
        chunks.iter().map(OutputChunk::to_sse).collect()
    }

    #[test]
    fn test_start_and_text() {
        let mut enc = encoder(false);
        let out = sse(&enc.encode(&Step::Start));
        assert!(out.starts_with("data: {"));
        assert!(out.contains("\"role\":\"assistant\""));
        assert!(out.contains("\"object\":\"chat.completion.chunk\""));

        let out = sse(&enc.encode(&Step::BlockDelta {
            index: 0,
            delta: StepDelta::Text("Hello!".to_string()),
        }));
        assert!(out.contains("\"content\":\"Hello!\""));
        assert!(!out.contains("role"));
    }

    #[test]
    fn test_tool_call_chunks() {
        let mut enc = encoder(false);
        let start = enc.encode(&Step::BlockStart {
            index: 1,
            kind: BlockKind::ToolUse {
                id: "t1".to_string(),
                name: "get_weather".to_string(),
                tool_index: 0,
            },
        });
        let value: serde_json::Value =
            serde_json::from_str(sse(&start).trim_start_matches("data: ").trim()).unwrap();
        let call = &value["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["id"], "t1");
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["name"], "get_weather");
    }

    #[test]
    fn test_finish_with_usage_then_done() {
        let mut enc = encoder(true);
        let out = enc.encode(&Step::Finish {
            reason: FinishReason::Stop,
            stop_sequence: None,
            usage: Usage {
                input_tokens: 5,
                output_tokens: 2,
            },
        });
        assert_eq!(out.len(), 3);
        let text = sse(&out);
        assert!(text.contains("\"finish_reason\":\"stop\""));
        assert!(text.contains("\"total_tokens\":7"));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn test_error_has_no_done() {
        let mut enc = encoder(false);
        let out = enc.encode(&Step::Error {
            kind: ErrorKind::RateLimit,
            message: "slow down".to_string(),
        });
        assert_eq!(out.len(), 1);
        let text = sse(&out);
        assert!(text.contains("rate_limit_exceeded"));
        assert!(!text.contains("[DONE]"));
    }

    #[test]
    fn test_render_response_tool_calls() {
        let message = CompletedMessage {
            blocks: vec![CompletedBlock::ToolUse {
                id: "t1".to_string(),
                name: "f".to_string(),
                arguments: String::new(),
            }],
            finish: FinishReason::ToolCalls,
            stop_sequence: None,
            usage: Usage {
                input_tokens: 3,
                output_tokens: 1,
            },
        };
        let ctx = ResponseContext::new(Protocol::OpenAi, "claude-sonnet-4.5", 3);
        let body = render_response(&message, &ctx);

        assert!(body.id.starts_with("chatcmpl-"));
        let choice = &body.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(choice.message.content, None);
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].function.arguments, "{}");
        assert_eq!(body.usage.total_tokens, 4);
    }
}
