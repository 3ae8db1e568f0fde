//! Deskline - command line client for the dashboard session core.
//!
//! Main entry point for the Deskline CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{listen, login, logout, request, whoami};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Deskline - sign in, call the API, and follow realtime events
#[derive(Parser)]
#[command(name = "deskline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (default: $XDG_CONFIG_HOME/deskline/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend API URL (default: http://localhost:3000)
    #[arg(long, global = true, env = "DESKLINE_SERVER_URL")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login(login::LoginArgs),

    /// Sign out and clear stored credentials
    Logout(logout::LogoutArgs),

    /// Show the signed-in user
    Whoami(whoami::WhoamiArgs),

    /// Send an authenticated API request
    Request(request::RequestArgs),

    /// Print realtime events until interrupted
    Listen(listen::ListenArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "deskline=debug,deskline_client=debug,deskline_config=debug,info"
    } else {
        "deskline=info,error"
    };

    let log_dir = deskline_config::xdg_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deskline.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "deskline=trace,deskline_client=trace,deskline_config=trace,info",
                )),
        )
        .init();

    let loaded = deskline_config::load_config(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(ref source) = loaded.source {
        tracing::debug!(path = %source.display(), "loaded config");
    }

    let mut config = loaded.config;
    if let Some(server) = cli.server {
        config = config.with_api_url(server);
    }

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Login(args) => login::run(args, &ctx).await,
        Commands::Logout(args) => logout::run(args, &ctx).await,
        Commands::Whoami(args) => whoami::run(args, &ctx).await,
        Commands::Request(args) => request::run(args, &ctx).await,
        Commands::Listen(args) => listen::run(args, &ctx).await,
    }
}
