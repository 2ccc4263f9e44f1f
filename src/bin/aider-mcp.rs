//! aider-mcp -- MCP server for aider tasks and Gemini expert panels.
//!
//! Usage: aider-mcp [--workspace <path>] [--aider-command <cmd>] ...

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use aider_mcp::config::{DEFAULT_GEMINI_API_BASE, DEFAULT_GEMINI_MODEL, Settings};
use aider_mcp::gemini::GeminiClient;
use aider_mcp::tools::ToolRouter;

#[derive(Debug, Parser)]
#[command(name = "aider-mcp", version, about)]
struct Cli {
    /// Directory aider runs in; relative file paths resolve against it.
    #[arg(long, env = "AIDER_MCP_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Aider executable.
    #[arg(long, env = "AIDER_COMMAND", default_value = "aider")]
    aider_command: String,

    /// Deadline for foreground aider runs, in seconds.
    #[arg(long, env = "AIDER_TIMEOUT_SECS", default_value_t = 1800)]
    aider_timeout_secs: u64,

    /// Default Gemini model for panel tools.
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    /// Gemini REST base URL.
    #[arg(long, env = "GEMINI_API_BASE", default_value = DEFAULT_GEMINI_API_BASE)]
    gemini_api_base: String,

    /// Deadline for a single Gemini request, in seconds.
    #[arg(long, env = "GEMINI_TIMEOUT_SECS", default_value_t = 120)]
    gemini_timeout_secs: u64,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    // Missing .env is normal.
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize tracing to stderr so it does not interfere with MCP stdio.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Ok(path) = &dotenv {
        info!(path = %path.display(), "loaded .env");
    }

    let workspace = cli
        .workspace
        .canonicalize()
        .with_context(|| format!("workspace not found: {}", cli.workspace.display()))?;

    if which::which(&cli.aider_command).is_err() {
        warn!(
            command = cli.aider_command,
            "aider executable not found on PATH; aider tools will fail with ExecutionError"
        );
    }

    let settings = Settings {
        workspace,
        aider_command: cli.aider_command,
        aider_timeout: Duration::from_secs(cli.aider_timeout_secs),
        gemini_model: cli.gemini_model,
        gemini_api_base: cli.gemini_api_base,
        gemini_timeout: Duration::from_secs(cli.gemini_timeout_secs),
        ..Settings::default()
    }
    .with_process_env();

    let client = GeminiClient::new(settings.gemini_api_base.clone(), settings.gemini_timeout)?;
    let router = ToolRouter::new(settings, Box::new(client));

    aider_mcp::run_mcp_server(&router)
}
