// Command-line interface for kiro-proxy

use clap::Parser;
use std::path::PathBuf;

/// kiro-proxy - OpenAI and Anthropic compatible gateway to the Kiro backend
#[derive(Parser, Debug)]
#[command(name = "kiro-proxy", version, about, long_about = None)]
pub struct Args {
    /// Config file (default: ~/.kiro-proxy/config.json)
    #[arg(long, short = 'c', env = "KIRO_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on, overriding the config file
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Address to bind, overriding the config file
    #[arg(long)]
    pub host: Option<String>,
}

impl Args {
    /// Applies the flags on top of a loaded configuration.
    pub fn apply(&self, config: &mut crate::config::AppConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
    }
}
