//! AWS event-stream framing as spoken by `generateAssistantResponse`.
//!
//! Each frame is `total_len:u32 | headers_len:u32 | prelude_crc:u32 |
//! headers | payload | message_crc:u32`, all big endian. Lengths are
//! validated; the CRCs are skipped.

use super::BackendEvent;
use crate::error::{ProxyError, Result};
use bytes::{Buf, Bytes, BytesMut};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + CRC_LEN;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One decoded frame. Only string headers are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: HashMap<String, String>,
    pub payload: Bytes,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Incremental decoder: feed bytes as they arrive, pull complete frames.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// True when bytes of an incomplete frame are still buffered.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        let headers_len = u32::from_be_bytes([
            self.buffer[4],
            self.buffer[5],
            self.buffer[6],
            self.buffer[7],
        ]) as usize;

        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) {
            return Err(ProxyError::StreamInterrupted(format!(
                "invalid event-stream frame length {}",
                total_len
            )));
        }
        if headers_len > total_len - MIN_FRAME_LEN {
            return Err(ProxyError::StreamInterrupted(format!(
                "event-stream header length {} exceeds frame length {}",
                headers_len, total_len
            )));
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total_len).freeze();
        frame.advance(PRELUDE_LEN);
        let headers = parse_headers(frame.split_to(headers_len))?;
        let payload = frame.split_to(total_len - MIN_FRAME_LEN - headers_len);

        Ok(Some(Frame { headers, payload }))
    }
}

fn parse_headers(mut raw: Bytes) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();

    while raw.has_remaining() {
        let name_len = raw.get_u8() as usize;
        ensure_remaining(&raw, name_len + 1)?;
        let name = String::from_utf8_lossy(&raw.split_to(name_len)).into_owned();
        let value_type = raw.get_u8();

        let fixed = match value_type {
            0 | 1 => Some(0),
            2 => Some(1),
            3 => Some(2),
            4 => Some(4),
            5 | 8 => Some(8),
            9 => Some(16),
            6 | 7 => None,
            other => {
                return Err(ProxyError::StreamInterrupted(format!(
                    "unknown event-stream header type {}",
                    other
                )))
            }
        };

        match fixed {
            Some(len) => {
                ensure_remaining(&raw, len)?;
                raw.advance(len);
            }
            None => {
                ensure_remaining(&raw, 2)?;
                let len = raw.get_u16() as usize;
                ensure_remaining(&raw, len)?;
                let value = raw.split_to(len);
                if value_type == 7 {
                    headers.insert(name, String::from_utf8_lossy(&value).into_owned());
                }
            }
        }
    }

    Ok(headers)
}

fn ensure_remaining(raw: &Bytes, needed: usize) -> Result<()> {
    if raw.remaining() < needed {
        return Err(ProxyError::StreamInterrupted(
            "truncated event-stream header".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AssistantResponseEvent {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ReasoningContentEvent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolUseEvent {
    tool_use_id: String,
    name: Option<String>,
    input: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageMetadataEvent {
    stop_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExceptionPayload {
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Maps one frame to the event it carries, if any.
pub fn frame_to_event(frame: &Frame) -> Result<Option<BackendEvent>> {
    match frame.header(":message-type").unwrap_or("event") {
        "exception" | "error" => {
            let code = frame
                .header(":exception-type")
                .or_else(|| frame.header(":error-code"))
                .unwrap_or("UnknownError")
                .to_string();
            let payload: ExceptionPayload =
                serde_json::from_slice(&frame.payload).unwrap_or_default();
            let message = payload
                .message
                .or_else(|| frame.header(":error-message").map(str::to_string))
                .unwrap_or_else(|| String::from_utf8_lossy(&frame.payload).into_owned());
            return Ok(Some(BackendEvent::Error { code, message }));
        }
        _ => {}
    }

    let event_type = frame.header(":event-type").unwrap_or_default();
    let event = match event_type {
        "assistantResponseEvent" => {
            let event: AssistantResponseEvent = parse_payload(frame)?;
            (!event.content.is_empty()).then_some(BackendEvent::TextDelta(event.content))
        }
        "reasoningContentEvent" => {
            let event: ReasoningContentEvent = parse_payload(frame)?;
            (!event.text.is_empty()).then_some(BackendEvent::ThinkingDelta(event.text))
        }
        "toolUseEvent" => {
            let event: ToolUseEvent = parse_payload(frame)?;
            let arguments = match event.input {
                Some(serde_json::Value::String(fragment)) => Some(fragment),
                Some(serde_json::Value::Null) | None => None,
                // A complete input object instead of a fragment.
                Some(other) => Some(other.to_string()),
            };
            Some(BackendEvent::ToolCallDelta {
                id: event.tool_use_id,
                name: event.name,
                arguments: arguments.filter(|a| !a.is_empty()),
            })
        }
        "messageMetadataEvent" => {
            let event: MessageMetadataEvent = parse_payload(frame)?;
            event.stop_reason.map(BackendEvent::FinishReason)
        }
        "meteringEvent" | "contextUsageEvent" | "followupPromptEvent"
        | "supplementaryWebLinksEvent" | "codeReferenceEvent" => {
            debug!("Ignoring backend event {}", event_type);
            None
        }
        other => {
            warn!("Unknown backend event type '{}'", other);
            None
        }
    };

    Ok(event)
}

fn parse_payload<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<T> {
    serde_json::from_slice(&frame.payload).map_err(|e| {
        ProxyError::StreamInterrupted(format!(
            "malformed {} payload: {}",
            frame.header(":event-type").unwrap_or("event"),
            e
        ))
    })
}

/// Encodes a frame with string headers. CRC fields are written as zero.
#[cfg(test)]
pub(crate) fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }

    let total = MIN_FRAME_LEN + header_bytes.len() + payload.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0; 4]);
    out
}
