//! Clap derive structures for the `powertrack` CLI.
//!
//! Defines the command tree and global flags.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// powertrack -- stream PowerTrack activities to stdout
#[derive(Debug, Parser)]
#[command(
    name = "powertrack",
    version,
    about = "Stream PowerTrack activities from the command line",
    long_about = "Connects to a PowerTrack stream and prints every activity as one JSON \
        line on stdout.\n\n\
        Credentials and the stream URL come from flags, environment variables, or \
        the config file, in that order.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file to use instead of the default locations
    #[arg(long, env = "POWERTRACK_CONFIG", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect and print activities until interrupted
    #[command(alias = "s")]
    Stream(StreamArgs),

    /// Inspect or create the config file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Stream ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StreamArgs {
    /// Stream URL (overrides the config file)
    #[arg(long, short = 'u', env = "POWERTRACK_URL")]
    pub url: Option<String>,

    /// Account username
    #[arg(long, env = "POWERTRACK_USERNAME")]
    pub username: Option<String>,

    /// Account password
    #[arg(long, env = "POWERTRACK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Replay up to MINUTES (0-5) of activities missed before connecting
    #[arg(long, short = 'b', value_name = "MINUTES", allow_negative_numbers = true)]
    pub backfill: Option<i64>,

    /// Pretty-print each activity instead of one line per activity
    #[arg(long)]
    pub pretty: bool,

    /// Reconnect with exponential backoff when the stream drops
    #[arg(long, short = 'r')]
    pub reconnect: bool,

    /// Give up after N consecutive failed reconnects
    #[arg(long, value_name = "N", requires = "reconnect")]
    pub max_retries: Option<u32>,

    /// Seconds without data (or keep-alive) before the stream counts as dead
    #[arg(long, value_name = "SECONDS", default_value = "30")]
    pub stall_timeout: u64,

    /// Wait forever for data instead of detecting stalls
    #[arg(long, conflicts_with = "stall_timeout")]
    pub no_stall_timeout: bool,

    /// Accept invalid TLS certificates (test endpoints only)
    #[arg(long, short = 'k')]
    pub insecure: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path that would be used
    Path,

    /// Show the settings found in the config file (password redacted)
    Show,

    /// Write a config file, prompting for anything not given
    Init(InitArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Account username
    #[arg(long)]
    pub username: Option<String>,

    /// Account password
    #[arg(long, env = "POWERTRACK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Stream URL
    #[arg(long)]
    pub url: Option<String>,

    /// Overwrite an existing config file
    #[arg(long, short = 'f')]
    pub force: bool,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
