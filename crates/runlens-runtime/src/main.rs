//! runlens: project a test-run session's step stream into read models.
//!
//! `replay` projects a recorded stream once; `follow` polls the stream file
//! and prints every snapshot that changes.

use anyhow::Context;
use clap::Parser;

use runlens_core::ProjectionConfig;

mod cli;
mod cmd_follow;
mod cmd_replay;
mod file_source;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // stdout carries snapshots; logs go to stderr.
    let filter = std::env::var("RUNLENS_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => ProjectionConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ProjectionConfig::default(),
    };

    match args.command {
        cli::Command::Replay(opts) => cmd_replay::cmd_replay(&opts, config)?,
        cli::Command::Follow(opts) => cmd_follow::cmd_follow(&opts, config).await?,
    }

    Ok(())
}
