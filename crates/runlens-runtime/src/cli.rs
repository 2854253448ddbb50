//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "runlens", about = "Project a test-run session's step stream into read models")]
pub struct Cli {
    /// Projection config file (TOML)
    #[arg(long, global = true, env = "RUNLENS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Project a recorded step stream once and print the snapshot
    Replay(ReplayOpts),
    /// Watch a step stream file and print every changed snapshot
    Follow(FollowOpts),
}

#[derive(clap::Args, Debug)]
pub struct ReplayOpts {
    /// Step records: a JSON array or JSON lines
    pub file: PathBuf,

    /// Session to project (default: session of the first record)
    #[arg(long)]
    pub session: Option<String>,

    /// Session document (JSON) supplying status and remote view URL
    #[arg(long)]
    pub session_file: Option<PathBuf>,

    /// Pretty-print the snapshot
    #[arg(long)]
    pub pretty: bool,
}

#[derive(clap::Args, Debug)]
pub struct FollowOpts {
    /// Step records: a JSON array or JSON lines
    pub file: PathBuf,

    /// Session to project (default: session of the first record)
    #[arg(long)]
    pub session: Option<String>,

    /// Session document (JSON) supplying status and remote view URL
    #[arg(long)]
    pub session_file: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "1000")]
    pub interval_ms: u64,
}
