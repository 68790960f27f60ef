//! Command-line interface definitions using clap.

use minerhat::paths;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Run a miner while players are online and credit them the pool revenue.
#[derive(Parser, Debug)]
#[command(name = "minerhat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Data directory holding config, policies and player records.
    #[arg(long, env = "MINERHAT_DATA_DIR", default_value_os_t = paths::default_data_dir())]
    pub data_dir: PathBuf,

    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the default config and an example xmrig policy.
    Init(InitArgs),

    /// Inspect miner policies.
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// Run the host loop, reading player events from stdin.
    Run,

    /// Show a player's realized and pending revenue.
    Revenue(PlayerArgs),

    /// Show a player's revenue history.
    History(PlayerArgs),
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config and example policy.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Load a policy and check that its executable is usable.
    Validate {
        /// Policy name (defaults to the configured miner).
        name: Option<String>,
    },
}

#[derive(Parser, Debug)]
pub struct PlayerArgs {
    /// Player UUID.
    pub player: Uuid,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}
