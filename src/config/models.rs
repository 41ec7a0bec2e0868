//! Configuration data structures for kiro-proxy.
//!
//! The three flat keys (`credentials_file`, `api_key`, `port`) are the ones the
//! setup wizard writes to `~/.kiro-proxy/config.json`; everything else is
//! optional tuning grouped into sections.

use crate::transcoder::FinishReason;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the Kiro IDE token cache.
    /// Default: `~/.aws/sso/cache/kiro-auth-token.json`
    #[serde(default = "default_credentials_file")]
    pub credentials_file: String,

    /// Static key clients must present as `Authorization: Bearer <key>`.
    #[serde(default)]
    pub api_key: String,

    /// The IP address or hostname the server should bind to.
    /// Default: `0.0.0.0`
    #[serde(default = "default_host")]
    pub host: String,

    /// The port number the server should listen on.
    /// Default: `8000`
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub transcoder: TranscoderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Maximum accepted request body in bytes (base64 images inflate requests).
    /// Default: `50 MiB`
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

/// Settings for keeping the Kiro access token fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Refresh the access token automatically when it nears expiry.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub auto_refresh: bool,

    /// Seconds before expiry at which a token is treated as expired.
    /// Default: `300`
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_seconds: i64,

    /// Attempts for one refresh exchange (429/5xx/network failures only).
    /// Default: `3`
    #[serde(default = "default_refresh_attempts")]
    pub refresh_max_attempts: u32,

    /// Overrides the Kiro desktop refresh endpoint.
    /// Default: `https://prod.{region}.auth.desktop.kiro.dev/refreshToken`
    #[serde(default)]
    pub refresh_url: Option<String>,

    /// Overrides the AWS SSO OIDC token endpoint used for IdC logins.
    /// Default: `https://oidc.{region}.amazonaws.com/token`
    #[serde(default)]
    pub oidc_url: Option<String>,

    /// Write refreshed credentials back to the token cache file.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub persist_refreshed: bool,

    /// Region used when the credential file does not name one.
    /// Default: `us-east-1`
    #[serde(default = "default_region")]
    pub region: String,
}

/// Settings for the upstream Kiro API connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Default: `us-east-1`
    #[serde(default = "default_region")]
    pub region: String,

    /// Overrides `https://codewhisperer.{region}.amazonaws.com`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Whole-request timeout, streaming included.
    /// Default: `600`
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Default: `30`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

/// Settings for turning backend events into client responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Upstream stop-reason codes mapped to canonical finish reasons.
    /// Entries here extend or override the built-in table.
    #[serde(default)]
    pub finish_reasons: HashMap<String, FinishReason>,

    /// Finish reason used for upstream codes nobody recognizes.
    /// Default: `stop`
    #[serde(default = "default_fallback_finish")]
    pub fallback_finish_reason: FinishReason,

    /// Idle seconds before a keep-alive frame is written to a stream.
    /// Default: `15`
    #[serde(default = "default_keepalive")]
    pub keepalive_seconds: u64,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`, `compact`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
            api_key: String::new(),
            host: default_host(),
            port: default_port(),
            server: ServerConfig::default(),
            credentials: CredentialsConfig::default(),
            backend: BackendConfig::default(),
            transcoder: TranscoderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            refresh_margin_seconds: default_refresh_margin(),
            refresh_max_attempts: default_refresh_attempts(),
            refresh_url: None,
            oidc_url: None,
            persist_refreshed: true,
            region: default_region(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            base_url: None,
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            finish_reasons: HashMap::new(),
            fallback_finish_reason: default_fallback_finish(),
            keepalive_seconds: default_keepalive(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_credentials_file() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".aws")
        .join("sso")
        .join("cache")
        .join("kiro-auth-token.json")
        .to_string_lossy()
        .to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_body_limit() -> usize {
    50 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_refresh_margin() -> i64 {
    300
}

fn default_refresh_attempts() -> u32 {
    3
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_timeout() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_fallback_finish() -> FinishReason {
    FinishReason::Stop
}

fn default_keepalive() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
