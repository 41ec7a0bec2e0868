//! Structured logging and secret redaction.
//!
//! Configures the `tracing` subscriber and provides `sanitize`, which every
//! upstream body passes through before it is logged or returned to a client.

use crate::config::LoggingConfig;
use crate::error::Result;
use lazy_static::lazy_static;
use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber for the application.
///
/// Supports three output formats:
/// - `json`: Structured JSON logs for production ingestion.
/// - `compact`: Single-line human-readable output.
/// - `pretty` (default): Multi-line, colorized output for development.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format.as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    result.map_err(|e| crate::error::ProxyError::Config(format!("Logging init failed: {}", e)))
}

lazy_static! {
    static ref BEARER: Regex = Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").unwrap();
    /// Kiro access (`aoa…`) and refresh (`aor…`) tokens.
    static ref KIRO_TOKEN: Regex = Regex::new(r"\bao[ar][A-Za-z0-9._~+/=:-]{16,}").unwrap();
    static ref JSON_SECRET: Regex = Regex::new(
        r#""(accessToken|refreshToken|clientSecret|access_token|refresh_token)"\s*:\s*"[^"]*""#
    )
    .unwrap();
}

/// Replaces bearer tokens and Kiro token shapes with redaction markers.
pub fn sanitize(input: &str) -> String {
    let result = JSON_SECRET.replace_all(input, r#""$1":"[REDACTED]""#);
    let result = BEARER.replace_all(&result, "Bearer [REDACTED]");
    KIRO_TOKEN
        .replace_all(&result, "[REDACTED_TOKEN]")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_bearer() {
        let output = sanitize("Authorization: Bearer abc.def-123");
        assert_eq!(output, "Authorization: Bearer [REDACTED]");
    }

    #[test]
    fn test_sanitize_kiro_tokens() {
        let output = sanitize("token aoaAAAAAGhmZ2Vy0123456789abcdef expired");
        assert!(output.contains("[REDACTED_TOKEN]"));
        assert!(!output.contains("aoaAAAAAGhmZ2Vy"));
    }

    #[test]
    fn test_sanitize_json_fields() {
        let output = sanitize(r#"{"refreshToken": "secret-value", "region": "us-east-1"}"#);
        assert!(!output.contains("secret-value"));
        assert!(output.contains(r#""region": "us-east-1""#));
    }
}
