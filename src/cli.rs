//! CLI struct definitions for the blackboard command-line interface.
//!
//! Top-level clap types live here; each subsystem defines its own subcommand tree next to
//! its implementation.

use crate::plugins::{
    artifacts::ArtifactCli, claims::ClaimCli, decisions::DecisionCli, events::EventsCli,
    hooks::HookCli, session::SessionCli,
};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "blackboard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local-first coordination substrate for concurrent agents: advisory claims, an artifact DAG, a bounded event log, a decision ledger, and recoverable session snapshots."
)]
pub(crate) struct Cli {
    /// Store root (defaults to `$BLACKBOARD_ROOT`, else the nearest `.blackboard` directory).
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// Debug-level logging on stderr.
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub(crate) struct InitCli {
    /// Project directory to initialize (defaults to the current directory).
    #[clap(short, long)]
    pub dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ConfigCli {
    #[clap(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ConfigCommand {
    /// Print the effective configuration as TOML.
    Show,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the `.blackboard` store and its databases.
    Init(InitCli),
    /// Advisory resource claims.
    Claim(ClaimCli),
    /// Artifact registry and dependency DAG.
    Artifact(ArtifactCli),
    /// Coordination event log.
    Events(EventsCli),
    /// Decision ledger.
    Decision(DecisionCli),
    /// Session snapshots, recovery, and retention.
    Session(SessionCli),
    /// Trigger points for editors and VCS hooks. Always exits 0.
    Hook(HookCli),
    /// Effective configuration.
    Config(ConfigCli),
    /// Print the machine-readable schema of every subsystem.
    Schema,
}
