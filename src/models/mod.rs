//! Data models for the public protocols and the canonical request.
//!
//! - `anthropic`: Anthropic Messages API request/response types.
//! - `openai`: OpenAI Chat Completions request/response/chunk types.
//! - `streaming`: Anthropic server-sent event types.
//! - `canonical`: the protocol-neutral request handed to the backend client.
//! - `mapping`: public model name to backend model id table.

pub mod anthropic;
pub mod canonical;
pub mod mapping;
pub mod openai;
pub mod streaming;

use serde::{Deserialize, Serialize};

/// The public wire protocol a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    OpenAi,
    Anthropic,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::OpenAi => "openai",
            Protocol::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
