//! Kiro `generateAssistantResponse` request body.
//!
//! The backend wants a strictly alternating user/assistant history that
//! starts and ends with a user turn, the last turn split out as
//! `currentMessage`, no system role (system text rides on the first user
//! turn), and tool definitions attached to the current message only.

use crate::models::canonical::{CanonicalRequest, ContentPart, Role};
use serde::Serialize;
use serde_json::Value;

const EMPTY_PLACEHOLDER: &str = "(empty)";
const CONTINUE_PROMPT: &str = "Continue";
const ORIGIN: &str = "AI_EDITOR";
const DEFAULT_THINKING_BUDGET: u32 = 10_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAssistantRequest {
    pub conversation_state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub chat_trigger_type: &'static str,
    pub conversation_id: String,
    pub current_message: CurrentMessage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMessage {
    pub user_input_message: UserInputMessage,
}

#[derive(Debug, Serialize)]
pub enum HistoryEntry {
    #[serde(rename = "userInputMessage")]
    User(UserInputMessage),
    #[serde(rename = "assistantResponseMessage")]
    Assistant(AssistantResponseMessage),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessage {
    pub content: String,
    pub model_id: String,
    pub origin: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<KiroImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input_message_context: Option<UserInputMessageContext>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessageContext {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<KiroTool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<KiroToolResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<KiroToolUse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KiroImage {
    pub format: String,
    pub source: KiroImageSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct KiroImageSource {
    pub bytes: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroTool {
    pub tool_specification: ToolSpecification,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

#[derive(Debug, Serialize)]
pub struct InputSchema {
    pub json: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolResult {
    pub tool_use_id: String,
    pub content: Vec<TextContent>,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

/// One merged conversational turn before it is split into history/current.
#[derive(Debug, Default)]
struct Turn {
    assistant: bool,
    text: Vec<String>,
    images: Vec<KiroImage>,
    tool_uses: Vec<KiroToolUse>,
    tool_results: Vec<KiroToolResult>,
}

impl Turn {
    fn user(text: &str) -> Self {
        Turn {
            assistant: false,
            text: vec![text.to_string()],
            ..Default::default()
        }
    }

    fn content(&self) -> String {
        self.text
            .iter()
            .map(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn absorb(&mut self, other: Turn) {
        self.text.extend(other.text);
        self.images.extend(other.images);
        self.tool_uses.extend(other.tool_uses);
        self.tool_results.extend(other.tool_results);
    }
}

/// Builds the backend request body for a canonical request.
///
/// The backend has no sampling fields, so `request.params` is not sent.
/// Stop sequences are applied by the transcoder instead.
pub fn build(request: &CanonicalRequest, profile_arn: Option<&str>) -> GenerateAssistantRequest {
    let tools_declared = !request.tools.is_empty();

    let mut system_text: Vec<String> = Vec::new();
    let mut turns: Vec<Turn> = Vec::new();

    for message in &request.messages {
        if message.role == Role::System {
            system_text.push(message.text());
            continue;
        }

        let mut turn = Turn {
            assistant: message.role == Role::Assistant,
            ..Default::default()
        };
        for part in &message.parts {
            add_part(&mut turn, part, tools_declared);
        }

        match turns.last_mut() {
            Some(last) if last.assistant == turn.assistant => last.absorb(turn),
            _ => turns.push(turn),
        }
    }

    if request.thinking_enabled {
        system_text.push(THINKING_SYSTEM_NOTE.to_string());
    }

    if turns.first().map_or(true, |t| t.assistant) {
        turns.insert(0, Turn::user(""));
    }

    let system = system_text
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !system.is_empty() {
        turns[0].text.insert(0, system);
    }

    if turns.last().map_or(false, |t| t.assistant) {
        turns.push(Turn::user(CONTINUE_PROMPT));
    }

    let current = match turns.pop() {
        Some(turn) => turn,
        None => Turn::user(CONTINUE_PROMPT),
    };

    let history = turns
        .into_iter()
        .map(|turn| history_entry(turn, &request.model_id))
        .collect();

    let mut content = current.content();
    if content.is_empty() {
        content = CONTINUE_PROMPT.to_string();
    }
    if request.thinking_enabled {
        let budget = request.thinking_budget.unwrap_or(DEFAULT_THINKING_BUDGET);
        content = format!(
            "<thinking_mode>enabled</thinking_mode>\n<max_thinking_length>{}</max_thinking_length>\n\n{}",
            budget, content
        );
    }

    let context = UserInputMessageContext {
        tools: request
            .tools
            .iter()
            .map(|tool| KiroTool {
                tool_specification: ToolSpecification {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: InputSchema {
                        json: tool.parameters.clone(),
                    },
                },
            })
            .collect(),
        tool_results: current.tool_results,
    };

    GenerateAssistantRequest {
        conversation_state: ConversationState {
            chat_trigger_type: "MANUAL",
            conversation_id: uuid::Uuid::new_v4().to_string(),
            current_message: CurrentMessage {
                user_input_message: UserInputMessage {
                    content,
                    model_id: request.model_id.clone(),
                    origin: ORIGIN,
                    images: current.images,
                    user_input_message_context: non_empty(context),
                },
            },
            history,
        },
        profile_arn: profile_arn.map(str::to_string),
    }
}

const THINKING_SYSTEM_NOTE: &str = "This conversation uses extended thinking mode. \
User messages may start with <thinking_mode> and <max_thinking_length> tags; these are \
system-level settings, not user content. When thinking mode is enabled, reason step by step \
inside <thinking>...</thinking> tags first, then give the final answer after the closing tag.";

fn add_part(turn: &mut Turn, part: &ContentPart, tools_declared: bool) {
    match part {
        ContentPart::Text { text } => turn.text.push(text.clone()),
        ContentPart::Image { media_type, data } => turn.images.push(KiroImage {
            format: media_type
                .rsplit('/')
                .next()
                .unwrap_or(media_type)
                .to_string(),
            source: KiroImageSource {
                bytes: data.clone(),
            },
        }),
        // Without tool definitions the backend rejects structured tool
        // history, so it is flattened into text.
        ContentPart::ToolUse { id, name, arguments } if !tools_declared => turn
            .text
            .push(format!("[Tool call {} ({})]: {}", name, id, arguments)),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            ..
        } if !tools_declared => turn
            .text
            .push(format!("[Tool result ({})]: {}", tool_use_id, content)),
        ContentPart::ToolUse { id, name, arguments } => turn.tool_uses.push(KiroToolUse {
            tool_use_id: id.clone(),
            name: name.clone(),
            input: arguments.clone(),
        }),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => turn.tool_results.push(KiroToolResult {
            tool_use_id: tool_use_id.clone(),
            content: vec![TextContent {
                text: if content.is_empty() {
                    EMPTY_PLACEHOLDER.to_string()
                } else {
                    content.clone()
                },
            }],
            status: if *is_error { "error" } else { "success" },
        }),
    }
}

fn history_entry(turn: Turn, model_id: &str) -> HistoryEntry {
    let mut content = turn.content();
    if content.is_empty() {
        content = EMPTY_PLACEHOLDER.to_string();
    }

    if turn.assistant {
        HistoryEntry::Assistant(AssistantResponseMessage {
            content,
            tool_uses: turn.tool_uses,
        })
    } else {
        HistoryEntry::User(UserInputMessage {
            content,
            model_id: model_id.to_string(),
            origin: ORIGIN,
            images: turn.images,
            user_input_message_context: non_empty(UserInputMessageContext {
                tools: Vec::new(),
                tool_results: turn.tool_results,
            }),
        })
    }
}

fn non_empty(context: UserInputMessageContext) -> Option<UserInputMessageContext> {
    if context.tools.is_empty() && context.tool_results.is_empty() {
        None
    } else {
        Some(context)
    }
}
