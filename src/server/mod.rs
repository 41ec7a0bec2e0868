//! Axum-based HTTP server for kiro-proxy.
//!
//! Exposes the OpenAI (`/v1/chat/completions`) and Anthropic (`/v1/messages`)
//! surfaces behind a shared API key, plus health, metrics and model listing.
//!
//! # Components
//!
//! - `handlers`: endpoint implementations and the SSE writer.
//! - `middleware`: request ids and API key authentication.
//! - `routes`: router assembly and shared state.

mod handlers;
mod middleware;
mod routes;

pub use routes::{create_router, AppState};
