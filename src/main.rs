//! sse-bridge
//!
//! Serves a streaming (HTTP+SSE) protocol endpoint and forwards every call to
//! a backend process that only speaks unary HTTP.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                      SSE BRIDGE                       │
//!   GET /sse          │  ┌─────────┐   ┌──────────┐   ┌─────────────────┐     │
//!   ──────────────────┼─▶│  http   │──▶│ session  │──▶│ protocol server │     │
//!   POST /messages    │  │ server  │   │ registry │   │  (per session)  │     │
//!   ◀── event stream ─┼──│         │◀──│          │◀──│                 │     │
//!                     │  └─────────┘   └──────────┘   └────────┬────────┘     │
//!                     │                                        │              │
//!                     │                                        ▼              │
//!                     │  ┌─────────────┐   ┌────────────────────────────┐     │
//!                     │  │ coordinator │──▶│ backend connection (shared)│─────┼──▶ Backend
//!                     │  │ (lifecycle) │   │  client + HTTP transport   │     │    (child)
//!                     │  └──────┬──────┘   └────────────────────────────┘     │
//!                     │         │                                             │
//!                     │         ▼                                             │
//!                     │  ┌─────────────┐                                      │
//!                     │  │ supervisor  │── spawn / probe / SIGTERM ───────────┼──▶ Backend
//!                     │  └─────────────┘                                      │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use url::Url;

use sse_bridge::config::{self, BridgeConfig, ConfigError, LogFormat, Overrides};
use sse_bridge::lifecycle::startup;
use sse_bridge::observability::logging;
use sse_bridge::stdio;

#[derive(Parser)]
#[command(name = "sse-bridge", version)]
#[command(about = "HTTP+SSE bridge for a request/response JSON-RPC backend", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the streaming endpoint (default)
    Serve(ServeArgs),
    /// Bridge newline-delimited JSON-RPC on stdin/stdout to a backend URL
    Stdio(StdioArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Public listen host
    #[arg(long)]
    host: Option<String>,

    /// Public listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Port the backend listens on
    #[arg(long)]
    backend_port: Option<u16>,

    /// Workspace directory handed to the backend
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl ServeArgs {
    fn load(&self) -> Result<BridgeConfig, ConfigError> {
        let overrides = Overrides {
            host: self.host.clone(),
            port: self.port,
            backend_port: self.backend_port,
            workspace: self.workspace.clone(),
            log_level: self.log_level.clone(),
        };
        config::resolve_config(self.config.as_deref(), &overrides)
    }
}

#[derive(Args)]
struct StdioArgs {
    /// Backend endpoint
    #[arg(short, long, default_value = "http://localhost:8001/mcp")]
    url: Url,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Stdio(args)) => {
            logging::init(&args.log_level, LogFormat::Pretty);
            stdio::run(args.url).await?;
        }
        Some(Commands::Serve(args)) => serve(args).await?,
        None => serve(cli.serve).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.load()?;
    logging::init(&config.observability.log_level, config.observability.log_format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listener = %config.listener.bind_address(),
        "sse-bridge starting"
    );

    startup::run(config).await?;
    Ok(())
}
