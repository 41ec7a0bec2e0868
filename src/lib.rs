// kiro-proxy - OpenAI and Anthropic compatible gateway to the Kiro backend

pub mod backend;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod models;
pub mod server;
pub mod transcoder;
pub mod translation;
pub mod utils;
