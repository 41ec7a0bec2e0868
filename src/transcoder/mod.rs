//! Backend events to client responses.
//!
//! [`Transcoder`] is a protocol-agnostic state machine that turns
//! [`BackendEvent`]s into content-block [`Step`]s. A [`StreamEncoder`]
//! renders steps as SSE chunks for one protocol, while
//! [`collect_response`] folds the same steps into a [`CompletedMessage`] for
//! non-streaming calls, so both paths see identical content.

pub mod anthropic;
mod finish;
pub mod openai;

pub use finish::{FinishReason, FinishReasonMap};

use crate::backend::{BackendEvent, BackendEventStream};
use crate::error::{ErrorKind, ProxyError, Result};
use crate::models::anthropic::Usage;
use crate::models::openai::ChatCompletionChunk;
use crate::models::streaming::StreamEvent;
use crate::models::Protocol;
use crate::utils::tokens;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Text,
    Thinking,
    /// `tool_index` counts tool blocks only, starting at zero.
    ToolUse {
        id: String,
        name: String,
        tool_index: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepDelta {
    Text(String),
    Thinking(String),
    ToolArguments { tool_index: u32, fragment: String },
}

/// One protocol-neutral transcoding step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Start,
    BlockStart { index: u32, kind: BlockKind },
    BlockDelta { index: u32, delta: StepDelta },
    BlockStop { index: u32 },
    /// `stop_sequence` is the client stop sequence that ended the text.
    Finish {
        reason: FinishReason,
        stop_sequence: Option<String>,
        usage: Usage,
    },
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Text,
    Thinking,
}

/// Per-response state machine.
///
/// Text and thinking share a single "current" block that is closed whenever
/// the kind changes or a tool call begins. Tool blocks stay open until the
/// response finishes. Once a `Finish` or `Error` step is produced the
/// transcoder is terminated and emits nothing else.
///
/// The backend has no stop-sequence parameter, so client stop sequences are
/// enforced here: text that could still become a stop sequence is held back
/// until the next delta decides it.
pub struct Transcoder {
    finish_reasons: Arc<FinishReasonMap>,
    input_tokens: u32,
    started: bool,
    terminated: bool,
    next_index: u32,
    current: Option<(u32, ContentKind)>,
    tools: HashMap<String, (u32, u32)>,
    open_blocks: Vec<u32>,
    output_chars: usize,
    stop_sequences: Vec<String>,
    held_text: String,
}

impl Transcoder {
    pub fn new(finish_reasons: Arc<FinishReasonMap>, input_tokens: u32) -> Self {
        Self {
            finish_reasons,
            input_tokens,
            started: false,
            terminated: false,
            next_index: 0,
            current: None,
            tools: HashMap::new(),
            open_blocks: Vec::new(),
            output_chars: 0,
            stop_sequences: Vec::new(),
            held_text: String::new(),
        }
    }

    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = stop_sequences.into_iter().filter(|s| !s.is_empty()).collect();
        self
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn push(&mut self, event: BackendEvent) -> Vec<Step> {
        let mut steps = Vec::new();
        if self.terminated {
            return steps;
        }
        self.ensure_started(&mut steps);

        if !matches!(event, BackendEvent::TextDelta(_)) {
            self.release_held_text(&mut steps);
        }

        match event {
            BackendEvent::TextDelta(text) => self.text_delta(text, &mut steps),
            BackendEvent::ThinkingDelta(text) => {
                self.content_delta(ContentKind::Thinking, text, &mut steps)
            }
            BackendEvent::ToolCallDelta {
                id,
                name,
                arguments,
            } => self.tool_delta(id, name, arguments, &mut steps),
            BackendEvent::FinishReason(code) => {
                let mut reason = self.finish_reasons.resolve(&code);
                if reason == FinishReason::Stop && !self.tools.is_empty() {
                    reason = FinishReason::ToolCalls;
                }
                self.finish_with(reason, None, &mut steps);
            }
            BackendEvent::Error { code, message } => {
                warn!("Backend reported {}: {}", code, message);
                steps.push(Step::Error {
                    kind: ErrorKind::from_exception(&code),
                    message: format!("{}: {}", code, message),
                });
                self.terminated = true;
            }
        }

        steps
    }

    /// Terminates the response with an error step.
    pub fn fail(&mut self, error: &ProxyError) -> Vec<Step> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;
        vec![Step::Error {
            kind: error.kind(),
            message: error.to_string(),
        }]
    }

    /// Clean end of the backend stream. Synthesizes a finish when the
    /// backend never sent one.
    pub fn finish(&mut self) -> Vec<Step> {
        let mut steps = Vec::new();
        if self.terminated {
            return steps;
        }
        self.ensure_started(&mut steps);
        self.release_held_text(&mut steps);

        let reason = if self.tools.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        debug!("Backend stream ended without a stop reason, finishing with {:?}", reason);
        self.finish_with(reason, None, &mut steps);
        steps
    }

    fn ensure_started(&mut self, steps: &mut Vec<Step>) {
        if !self.started {
            self.started = true;
            steps.push(Step::Start);
        }
    }

    fn open_block(&mut self, kind: BlockKind, steps: &mut Vec<Step>) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        self.open_blocks.push(index);
        steps.push(Step::BlockStart { index, kind });
        index
    }

    fn close_current(&mut self, steps: &mut Vec<Step>) {
        if let Some((index, _)) = self.current.take() {
            self.open_blocks.retain(|open| *open != index);
            steps.push(Step::BlockStop { index });
        }
    }

    fn content_delta(&mut self, kind: ContentKind, text: String, steps: &mut Vec<Step>) {
        if text.is_empty() {
            return;
        }

        let index = match self.current {
            Some((index, current)) if current == kind => index,
            _ => {
                self.close_current(steps);
                let block = match kind {
                    ContentKind::Text => BlockKind::Text,
                    ContentKind::Thinking => BlockKind::Thinking,
                };
                let index = self.open_block(block, steps);
                self.current = Some((index, kind));
                index
            }
        };

        self.output_chars += text.chars().count();
        let delta = match kind {
            ContentKind::Text => StepDelta::Text(text),
            ContentKind::Thinking => StepDelta::Thinking(text),
        };
        steps.push(Step::BlockDelta { index, delta });
    }

    fn text_delta(&mut self, text: String, steps: &mut Vec<Step>) {
        if self.stop_sequences.is_empty() {
            self.content_delta(ContentKind::Text, text, steps);
            return;
        }

        self.held_text.push_str(&text);
        if let Some((position, stop)) = self.find_stop_sequence() {
            let before = self.held_text[..position].to_string();
            self.held_text.clear();
            self.content_delta(ContentKind::Text, before, steps);
            self.finish_with(FinishReason::StopSequence, Some(stop), steps);
            return;
        }

        let emit_to = self.held_text.len() - self.partial_stop_len();
        let emit: String = self.held_text.drain(..emit_to).collect();
        self.content_delta(ContentKind::Text, emit, steps);
    }

    /// Emits text held back for a possible stop sequence.
    fn release_held_text(&mut self, steps: &mut Vec<Step>) {
        if self.held_text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.held_text);
        self.content_delta(ContentKind::Text, text, steps);
    }

    /// Earliest stop sequence in the held text.
    fn find_stop_sequence(&self) -> Option<(usize, String)> {
        self.stop_sequences
            .iter()
            .filter_map(|stop| self.held_text.find(stop.as_str()).map(|pos| (pos, stop)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(pos, stop)| (pos, stop.clone()))
    }

    /// Length of the longest held suffix that starts some stop sequence.
    fn partial_stop_len(&self) -> usize {
        self.stop_sequences
            .iter()
            .flat_map(|stop| {
                (1..stop.len())
                    .filter(|&i| stop.is_char_boundary(i))
                    .filter(|&i| self.held_text.ends_with(&stop[..i]))
            })
            .max()
            .unwrap_or(0)
    }

    fn tool_delta(
        &mut self,
        id: String,
        name: Option<String>,
        arguments: Option<String>,
        steps: &mut Vec<Step>,
    ) {
        let (index, tool_index) = match self.tools.get(&id) {
            Some(open) => *open,
            None => {
                self.close_current(steps);
                let name = name.unwrap_or_else(|| {
                    warn!("Tool call {} started without a name", id);
                    String::new()
                });
                let tool_index = self.tools.len() as u32;
                let index = self.open_block(
                    BlockKind::ToolUse {
                        id: id.clone(),
                        name,
                        tool_index,
                    },
                    steps,
                );
                self.tools.insert(id, (index, tool_index));
                (index, tool_index)
            }
        };

        if let Some(fragment) = arguments.filter(|a| !a.is_empty()) {
            self.output_chars += fragment.chars().count();
            steps.push(Step::BlockDelta {
                index,
                delta: StepDelta::ToolArguments {
                    tool_index,
                    fragment,
                },
            });
        }
    }

    fn finish_with(
        &mut self,
        reason: FinishReason,
        stop_sequence: Option<String>,
        steps: &mut Vec<Step>,
    ) {
        self.current = None;
        for index in self.open_blocks.drain(..) {
            steps.push(Step::BlockStop { index });
        }
        steps.push(Step::Finish {
            reason,
            stop_sequence,
            usage: Usage {
                input_tokens: self.input_tokens,
                output_tokens: tokens::from_chars(self.output_chars),
            },
        });
        self.terminated = true;
    }
}

/// Identity of one response, shared by every chunk of it.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub input_tokens: u32,
}

impl ResponseContext {
    pub fn new(protocol: Protocol, model: &str, input_tokens: u32) -> Self {
        let id = match protocol {
            Protocol::OpenAi => format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            Protocol::Anthropic => format!("msg_{}", uuid::Uuid::new_v4().simple()),
        };
        Self {
            id,
            model: model.to_string(),
            created: chrono::Utc::now().timestamp(),
            input_tokens,
        }
    }
}

/// One SSE frame worth of output.
#[derive(Debug, Clone)]
pub enum OutputChunk {
    Completion(ChatCompletionChunk),
    /// OpenAI error envelope sent as a data frame.
    CompletionError(serde_json::Value),
    Event(StreamEvent),
    Done,
}

impl OutputChunk {
    pub fn to_sse(&self) -> String {
        match self {
            OutputChunk::Completion(chunk) => chunk.to_sse(),
            OutputChunk::CompletionError(body) => format!("data: {}\n\n", body),
            OutputChunk::Event(event) => event.to_sse(),
            OutputChunk::Done => "data: [DONE]\n\n".to_string(),
        }
    }

    /// Label used for SSE metrics.
    pub fn event_name(&self) -> &'static str {
        match self {
            OutputChunk::Completion(_) => "chunk",
            OutputChunk::CompletionError(_) => "error",
            OutputChunk::Event(event) => event.event_name(),
            OutputChunk::Done => "done",
        }
    }
}

/// Step renderer for the protocol chosen at the router.
pub enum StreamEncoder {
    OpenAi(openai::ChunkEncoder),
    Anthropic(anthropic::EventEncoder),
}

impl StreamEncoder {
    pub fn new(protocol: Protocol, ctx: ResponseContext, include_usage: bool) -> Self {
        match protocol {
            Protocol::OpenAi => StreamEncoder::OpenAi(openai::ChunkEncoder::new(ctx, include_usage)),
            Protocol::Anthropic => StreamEncoder::Anthropic(anthropic::EventEncoder::new(ctx)),
        }
    }

    pub fn encode(&mut self, step: &Step) -> Vec<OutputChunk> {
        match self {
            StreamEncoder::OpenAi(encoder) => encoder.encode(step),
            StreamEncoder::Anthropic(encoder) => encoder.encode(step),
        }
    }
}

/// Lazily transcodes a backend stream into output chunks. The backend is
/// polled only when the consumer asks for more.
pub fn transcode_stream(
    mut events: BackendEventStream,
    mut transcoder: Transcoder,
    mut encoder: StreamEncoder,
) -> impl Stream<Item = OutputChunk> + Send {
    async_stream::stream! {
        while let Some(item) = events.next().await {
            let steps = match item {
                Ok(event) => transcoder.push(event),
                Err(e) => {
                    warn!("Backend stream failed: {}", e);
                    transcoder.fail(&e)
                }
            };
            for step in steps {
                for chunk in encoder.encode(&step) {
                    yield chunk;
                }
            }
            if transcoder.is_terminated() {
                break;
            }
        }

        for step in transcoder.finish() {
            for chunk in encoder.encode(&step) {
                yield chunk;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletedBlock {
    Text(String),
    Thinking(String),
    /// `arguments` is the concatenation of every streamed fragment.
    ToolUse {
        id: String,
        name: String,
        arguments: String,
    },
}

/// A fully drained response, ready for a non-streaming body.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedMessage {
    pub blocks: Vec<CompletedBlock>,
    pub finish: FinishReason,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

impl CompletedMessage {
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                CompletedBlock::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn thinking(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                CompletedBlock::Thinking(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Default)]
struct Collector {
    blocks: Vec<CompletedBlock>,
    finish: Option<(FinishReason, Option<String>, Usage)>,
}

impl Collector {
    fn apply(&mut self, steps: Vec<Step>) -> Result<()> {
        for step in steps {
            match step {
                Step::Start | Step::BlockStop { .. } => {}
                Step::BlockStart { kind, .. } => self.blocks.push(match kind {
                    BlockKind::Text => CompletedBlock::Text(String::new()),
                    BlockKind::Thinking => CompletedBlock::Thinking(String::new()),
                    BlockKind::ToolUse { id, name, .. } => CompletedBlock::ToolUse {
                        id,
                        name,
                        arguments: String::new(),
                    },
                }),
                Step::BlockDelta { index, delta } => {
                    let block = self.blocks.get_mut(index as usize).ok_or_else(|| {
                        ProxyError::Internal(format!("delta for unknown block {}", index))
                    })?;
                    match (block, delta) {
                        (CompletedBlock::Text(text), StepDelta::Text(more))
                        | (CompletedBlock::Thinking(text), StepDelta::Thinking(more)) => {
                            text.push_str(&more)
                        }
                        (
                            CompletedBlock::ToolUse { arguments, .. },
                            StepDelta::ToolArguments { fragment, .. },
                        ) => arguments.push_str(&fragment),
                        _ => {
                            return Err(ProxyError::Internal(format!(
                                "delta does not match block {}",
                                index
                            )))
                        }
                    }
                }
                Step::Finish {
                    reason,
                    stop_sequence,
                    usage,
                } => self.finish = Some((reason, stop_sequence, usage)),
                Step::Error { message, .. } => return Err(ProxyError::StreamInterrupted(message)),
            }
        }
        Ok(())
    }
}

/// Drains a backend stream into a completed message.
///
/// Backend exceptions become `UpstreamException`; stream failures are
/// returned as they are.
pub async fn collect_response(
    mut events: BackendEventStream,
    mut transcoder: Transcoder,
) -> Result<CompletedMessage> {
    let mut collector = Collector::default();

    while let Some(item) = events.next().await {
        let event = item?;
        if let BackendEvent::Error { code, message } = event {
            return Err(ProxyError::UpstreamException { code, message });
        }
        collector.apply(transcoder.push(event))?;
        if transcoder.is_terminated() {
            break;
        }
    }
    collector.apply(transcoder.finish())?;

    let (finish, stop_sequence, usage) = collector
        .finish
        .ok_or_else(|| ProxyError::Internal("response finished without a stop reason".to_string()))?;

    Ok(CompletedMessage {
        blocks: collector.blocks,
        finish,
        stop_sequence,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcoder() -> Transcoder {
        Transcoder::new(Arc::new(FinishReasonMap::default()), 7)
    }

    fn tool(id: &str, name: Option<&str>, args: Option<&str>) -> BackendEvent {
        BackendEvent::ToolCallDelta {
            id: id.to_string(),
            name: name.map(str::to_string),
            arguments: args.map(str::to_string),
        }
    }

    fn events(list: Vec<BackendEvent>) -> BackendEventStream {
        Box::pin(futures::stream::iter(list.into_iter().map(Ok)))
    }

    #[test]
    fn test_text_then_eof_synthesizes_stop() {
        let mut t = transcoder();
        let mut steps = t.push(BackendEvent::TextDelta("Hel".to_string()));
        steps.extend(t.push(BackendEvent::TextDelta("lo!".to_string())));
        steps.extend(t.finish());

        assert_eq!(
            steps,
            vec![
                Step::Start,
                Step::BlockStart { index: 0, kind: BlockKind::Text },
                Step::BlockDelta { index: 0, delta: StepDelta::Text("Hel".to_string()) },
                Step::BlockDelta { index: 0, delta: StepDelta::Text("lo!".to_string()) },
                Step::BlockStop { index: 0 },
                Step::Finish {
                    reason: FinishReason::Stop,
                    stop_sequence: None,
                    usage: Usage { input_tokens: 7, output_tokens: 2 },
                },
            ]
        );
        assert!(t.is_terminated());
        assert!(t.finish().is_empty());
    }

    #[test]
    fn test_kind_switch_closes_block() {
        let mut t = transcoder();
        t.push(BackendEvent::ThinkingDelta("hmm".to_string()));
        let steps = t.push(BackendEvent::TextDelta("ok".to_string()));
        assert_eq!(
            steps,
            vec![
                Step::BlockStop { index: 0 },
                Step::BlockStart { index: 1, kind: BlockKind::Text },
                Step::BlockDelta { index: 1, delta: StepDelta::Text("ok".to_string()) },
            ]
        );
    }

    #[test]
    fn test_tool_fragments_forwarded_in_order() {
        let mut t = transcoder();
        t.push(BackendEvent::TextDelta("Checking.".to_string()));
        let mut steps = t.push(tool("t1", Some("get_weather"), Some("{\"ci")));
        steps.extend(t.push(tool("t1", None, Some("ty\":\"Par"))));
        steps.extend(t.push(tool("t1", None, Some("is\"}"))));
        steps.extend(t.push(BackendEvent::FinishReason("end_turn".to_string())));

        let fragments: Vec<_> = steps
            .iter()
            .filter_map(|s| match s {
                Step::BlockDelta { delta: StepDelta::ToolArguments { fragment, .. }, .. } => {
                    Some(fragment.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(fragments, vec!["{\"ci", "ty\":\"Par", "is\"}"]);

        assert_eq!(steps[0], Step::BlockStop { index: 0 });
        assert!(matches!(
            steps[1],
            Step::BlockStart { index: 1, kind: BlockKind::ToolUse { tool_index: 0, .. } }
        ));
        assert!(matches!(
            steps.last(),
            Some(Step::Finish { reason: FinishReason::ToolCalls, .. })
        ));
    }

    #[test]
    fn test_finish_closes_tool_blocks_in_opening_order() {
        let mut t = transcoder();
        t.push(tool("a", Some("first"), None));
        t.push(tool("b", Some("second"), None));
        let steps = t.finish();
        assert_eq!(steps[0], Step::BlockStop { index: 0 });
        assert_eq!(steps[1], Step::BlockStop { index: 1 });
        assert!(matches!(steps[2], Step::Finish { reason: FinishReason::ToolCalls, .. }));
    }

    #[test]
    fn test_error_terminates() {
        let mut t = transcoder();
        t.push(BackendEvent::TextDelta("partial".to_string()));
        let steps = t.push(BackendEvent::Error {
            code: "ThrottlingException".to_string(),
            message: "slow down".to_string(),
        });
        assert!(matches!(steps[0], Step::Error { kind: ErrorKind::RateLimit, .. }));
        assert!(t.push(BackendEvent::TextDelta("more".to_string())).is_empty());
        assert!(t.finish().is_empty());
    }

    #[test]
    fn test_missing_tool_name_still_opens_block() {
        let mut t = transcoder();
        let steps = t.push(tool("t9", None, Some("{}")));
        assert!(matches!(
            &steps[1],
            Step::BlockStart { kind: BlockKind::ToolUse { name, .. }, .. } if name.is_empty()
        ));
    }

    fn text_of(steps: &[Step]) -> String {
        steps
            .iter()
            .filter_map(|s| match s {
                Step::BlockDelta { delta: StepDelta::Text(text), .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_stop_sequence_split_across_deltas() {
        let mut t = transcoder().with_stop_sequences(vec!["END".to_string()]);
        let mut steps = t.push(BackendEvent::TextDelta("one two E".to_string()));
        assert_eq!(text_of(&steps), "one two ");
        steps.extend(t.push(BackendEvent::TextDelta("ND three".to_string())));

        assert_eq!(text_of(&steps), "one two ");
        assert!(matches!(
            steps.last(),
            Some(Step::Finish { reason: FinishReason::StopSequence, stop_sequence: Some(stop), .. })
                if stop == "END"
        ));
        assert!(t.is_terminated());
    }

    #[test]
    fn test_held_text_released_when_not_a_stop() {
        let mut t = transcoder().with_stop_sequences(vec!["###".to_string()]);
        let mut steps = t.push(BackendEvent::TextDelta("a #".to_string()));
        steps.extend(t.push(BackendEvent::TextDelta("b".to_string())));
        steps.extend(t.push(BackendEvent::TextDelta("c ##".to_string())));
        steps.extend(t.finish());

        assert_eq!(text_of(&steps), "a #bc ##");
        assert!(matches!(
            steps.last(),
            Some(Step::Finish { reason: FinishReason::Stop, stop_sequence: None, .. })
        ));
    }

    #[test]
    fn test_earliest_stop_sequence_wins() {
        let mut t = transcoder()
            .with_stop_sequences(vec!["world".to_string(), "lo".to_string(), String::new()]);
        let steps = t.push(BackendEvent::TextDelta("hello world".to_string()));
        assert_eq!(text_of(&steps), "hel");
        assert!(matches!(
            steps.last(),
            Some(Step::Finish { stop_sequence: Some(stop), .. }) if stop == "lo"
        ));
    }

    #[tokio::test]
    async fn test_collect_response() {
        let message = collect_response(
            events(vec![
                BackendEvent::ThinkingDelta("plan".to_string()),
                BackendEvent::TextDelta("Hello".to_string()),
                tool("t1", Some("f"), Some("{\"a\":")),
                tool("t1", None, Some("1}")),
            ]),
            transcoder(),
        )
        .await
        .unwrap();

        assert_eq!(message.thinking(), "plan");
        assert_eq!(message.text(), "Hello");
        assert_eq!(
            message.blocks[2],
            CompletedBlock::ToolUse {
                id: "t1".to_string(),
                name: "f".to_string(),
                arguments: "{\"a\":1}".to_string(),
            }
        );
        assert_eq!(message.finish, FinishReason::ToolCalls);
    }

    #[tokio::test]
    async fn test_collect_response_exception() {
        let result = collect_response(
            events(vec![BackendEvent::Error {
                code: "ValidationException".to_string(),
                message: "bad".to_string(),
            }]),
            transcoder(),
        )
        .await;
        assert!(matches!(result, Err(ProxyError::UpstreamException { .. })));
    }

    #[tokio::test]
    async fn test_backend_polled_only_on_demand() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let stream: BackendEventStream = Box::pin(futures::stream::iter(1..=5).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(BackendEvent::TextDelta(format!("part{} ", i)))
        }));
        let ctx = ResponseContext::new(Protocol::OpenAi, "claude-sonnet-4.5", 1);
        let chunks = transcode_stream(
            stream,
            transcoder(),
            StreamEncoder::new(Protocol::OpenAi, ctx, false),
        );
        futures::pin_mut!(chunks);

        assert_eq!(pulled.load(Ordering::SeqCst), 0);
        let mut taken = 0;
        while chunks.next().await.is_some() {
            taken += 1;
            if taken == 1 {
                assert_eq!(pulled.load(Ordering::SeqCst), 1);
            }
            assert!(pulled.load(Ordering::SeqCst) <= taken);
        }
        assert_eq!(pulled.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_stream_error_becomes_final_chunk() {
        let stream: BackendEventStream = Box::pin(futures::stream::iter(vec![
            Ok(BackendEvent::TextDelta("Hi".to_string())),
            Err(ProxyError::StreamInterrupted("reset".to_string())),
        ]));
        let ctx = ResponseContext::new(Protocol::OpenAi, "claude-sonnet-4.5", 1);
        let chunks: Vec<_> = transcode_stream(
            stream,
            transcoder(),
            StreamEncoder::new(Protocol::OpenAi, ctx, false),
        )
        .collect()
        .await;

        assert!(matches!(chunks.last(), Some(OutputChunk::CompletionError(_))));
        assert!(!chunks.iter().any(|c| matches!(c, OutputChunk::Done)));
    }
}
