// Public model name → Kiro backend model id

use crate::error::{ProxyError, Result};
use phf::phf_map;

/// Accepted public names. Dotted and dashed spellings are both in use by
/// clients, so both are listed; dated snapshots are handled by stripping the
/// date suffix before lookup.
static MODEL_MAP: phf::Map<&'static str, &'static str> = phf_map! {
    "claude-sonnet-4.5" => "CLAUDE_SONNET_4_5_20250929_V1_0",
    "claude-sonnet-4-5" => "CLAUDE_SONNET_4_5_20250929_V1_0",
    "claude-sonnet-4" => "CLAUDE_SONNET_4_20250514_V1_0",
    "claude-haiku-4.5" => "claude-haiku-4.5",
    "claude-haiku-4-5" => "claude-haiku-4.5",
    "claude-opus-4.5" => "claude-opus-4.5",
    "claude-opus-4-5" => "claude-opus-4.5",
    "claude-3.7-sonnet" => "CLAUDE_3_7_SONNET_20250219_V1_0",
    "claude-3-7-sonnet" => "CLAUDE_3_7_SONNET_20250219_V1_0",
    "auto" => "auto",
};

/// Names advertised by `GET /v1/models`.
pub const PUBLIC_MODELS: &[&str] = &[
    "claude-sonnet-4.5",
    "claude-sonnet-4",
    "claude-haiku-4.5",
    "claude-opus-4.5",
    "claude-3.7-sonnet",
];

/// Map a client-supplied model name to the backend model id.
pub fn map_model(model: &str) -> Result<String> {
    let lowered = model.trim().to_ascii_lowercase();
    let normalized = strip_date_suffix(&lowered);

    MODEL_MAP
        .get(normalized)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ProxyError::Validation(format!(
                "Unsupported model: {}. Supported models: {}",
                model,
                PUBLIC_MODELS.join(", ")
            ))
        })
}

/// Strip date suffix from model names (e.g., "claude-sonnet-4-5-20250929" -> "claude-sonnet-4-5")
fn strip_date_suffix(model: &str) -> &str {
    if model.len() > 9 && model.as_bytes()[model.len() - 9] == b'-' {
        let suffix = &model[model.len() - 8..];
        if suffix.bytes().all(|c| c.is_ascii_digit()) {
            return &model[..model.len() - 9];
        }
    }
    model
}
