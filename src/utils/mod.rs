//! Cross-cutting helpers: logging setup and redaction, retry with backoff,
//! and rough token estimation.

pub mod logging;
pub mod retry;
pub mod tokens;
