//! Portfolio Intelligence terminal client.
//!
//! Talks to the Portfolio Intelligence API, keeps one conversation per client
//! in a local store and resumes it on the next start.

use anyhow::Result;
use clap::Parser;
use portfolio_intel_lib::config::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "portfolio-intel")]
#[command(about = "Chat with the Portfolio Intelligence multi-agent API")]
struct Args {
    /// API base URL (default: http://localhost:8000)
    #[arg(long, env = "PORTFOLIO_API_URL")]
    api_url: Option<String>,

    /// Agent-status WebSocket base URL (defaults to the API URL)
    #[arg(long, env = "PORTFOLIO_WS_URL")]
    ws_url: Option<String>,

    /// Config file (default: ~/.portfolio-intel/config.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory for the local session store
    #[arg(long, env = "PORTFOLIO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print live agent activity while queries run
    #[arg(long)]
    agent_feed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the conversation.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("portfolio_intel_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    // CLI args > env vars (handled by clap) > config file > defaults
    if let Some(url) = args.api_url {
        config.api_base_url = url;
    }
    if let Some(url) = args.ws_url {
        config.ws_base_url = Some(url);
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }
    if let Some(secs) = args.timeout {
        config.request_timeout_secs = secs;
    }
    if args.agent_feed {
        config.agent_status_feed = true;
    }

    portfolio_intel_lib::run(config).await
}
