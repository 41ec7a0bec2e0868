//! Kiro backend client.
//!
//! Sends a canonical request to `generateAssistantResponse` and exposes the
//! reply as a lazily decoded stream of [`BackendEvent`]s.

mod client;
pub mod eventstream;
pub mod payload;
pub mod thinking;

pub use client::KiroClient;

use crate::error::Result;
use futures::Stream;
use std::pin::Pin;

/// One decoded unit of backend output, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// Tool call fragment. `name` usually arrives with the first fragment of
    /// an id; `arguments` are raw JSON text pieces to be concatenated.
    ToolCallDelta {
        id: String,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// Raw upstream stop reason.
    FinishReason(String),
    Error {
        code: String,
        message: String,
    },
}

/// Single-pass stream of backend events. Dropping it closes the upstream
/// connection.
pub type BackendEventStream = Pin<Box<dyn Stream<Item = Result<BackendEvent>> + Send>>;
