// Finish reason vocabulary and upstream stop-reason mapping

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Why a response ended, independent of the client protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    StopSequence,
}

impl FinishReason {
    pub fn openai(&self) -> &'static str {
        match self {
            FinishReason::Stop | FinishReason::StopSequence => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
        }
    }

    pub fn anthropic(&self) -> &'static str {
        match self {
            FinishReason::Stop => "end_turn",
            FinishReason::Length => "max_tokens",
            FinishReason::ToolCalls => "tool_use",
            FinishReason::ContentFilter => "refusal",
            FinishReason::StopSequence => "stop_sequence",
        }
    }
}

const BUILT_IN: &[(&str, FinishReason)] = &[
    ("end_turn", FinishReason::Stop),
    ("stop", FinishReason::Stop),
    ("max_tokens", FinishReason::Length),
    ("length", FinishReason::Length),
    ("tool_use", FinishReason::ToolCalls),
    ("tool_calls", FinishReason::ToolCalls),
    ("content_filtered", FinishReason::ContentFilter),
    ("content_filter", FinishReason::ContentFilter),
    ("refusal", FinishReason::ContentFilter),
    ("stop_sequence", FinishReason::StopSequence),
];

/// Upstream stop-reason codes to finish reasons, with a fallback for codes
/// nobody has mapped. Lookups ignore case.
#[derive(Debug, Clone)]
pub struct FinishReasonMap {
    table: HashMap<String, FinishReason>,
    fallback: FinishReason,
}

impl FinishReasonMap {
    /// Built-in table extended (or overridden) by `overrides`.
    pub fn new(overrides: &HashMap<String, FinishReason>, fallback: FinishReason) -> Self {
        let mut table: HashMap<String, FinishReason> = BUILT_IN
            .iter()
            .map(|(code, reason)| (code.to_string(), *reason))
            .collect();
        for (code, reason) in overrides {
            table.insert(code.to_ascii_lowercase(), *reason);
        }
        Self { table, fallback }
    }

    pub fn resolve(&self, code: &str) -> FinishReason {
        match self.table.get(&code.trim().to_ascii_lowercase()) {
            Some(reason) => *reason,
            None => {
                debug!("Unmapped upstream stop reason '{}', using fallback", code);
                self.fallback
            }
        }
    }
}

impl Default for FinishReasonMap {
    fn default() -> Self {
        Self::new(&HashMap::new(), FinishReason::Stop)
    }
}
