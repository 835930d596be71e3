//! Blackboard: a coordination and continuity substrate for concurrent agents.
//!
//! Agents working on one file tree share four record sets and a snapshot store:
//!
//! - **Claims** ([`plugins::claims`]): advisory, time-bounded "I am editing this path"
//!   markers. `acquire` never waits; a live foreign claim comes back as `Conflict`.
//! - **Artifacts** ([`plugins::artifacts`]): produced outputs and the paths they depend on,
//!   kept acyclic. Registering a path notifies everything that was waiting on it.
//! - **Events** ([`plugins::events`]): a bounded, monotonically identified log every
//!   mutation appends to. Consumers poll.
//! - **Decisions** ([`plugins::decisions`]): an append-only ledger queried by scope.
//! - **Sessions** ([`plugins::session`]): crash-consistent checkpoints of an agent's
//!   position, validated against the working tree on recovery.
//!
//! # The Thin Waist
//!
//! Every mutation of a record set goes through [`core::broker::DbBroker`]: an in-process
//! write lock per database plus an `IMMEDIATE` SQLite transaction. Claims stay advisory;
//! the broker only guarantees that concurrent writers cannot corrupt persisted state.
//!
//! # Examples
//!
//! ```bash
//! blackboard init
//! blackboard claim acquire src/api/users.ts --holder agent-a --scope 02/03/2
//! blackboard artifact register api/users --kind endpoint --depends-on models/user
//! blackboard decision record "Use UUIDv7 keys" --rationale "sortable" --made-by 02/03 --affects 02
//! blackboard session save
//! blackboard session recover
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store layout, broker, configuration, logging, and the external-source traits
//! - [`plugins`]: the subsystems and their CLI surfaces

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{Cli, Command, ConfigCommand, InitCli};
use crate::core::{
    db, error::BlackboardError, logging, output,
    store::{self, Store},
};
use crate::plugins::{artifacts, claims, decisions, events, hooks, session};

use clap::Parser;
use std::path::{Path, PathBuf};

/// Parse arguments, install logging, and dispatch.
pub fn run() -> Result<(), BlackboardError> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);
    dispatch(cli)
}

fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf, BlackboardError> {
    match explicit {
        Some(root) => Ok(root),
        None => store::find_store_root(&std::env::current_dir()?),
    }
}

fn open_existing(explicit: Option<PathBuf>) -> Result<Store, BlackboardError> {
    let root = resolve_root(explicit)?;
    if !root.is_dir() {
        return Err(BlackboardError::NotFound(format!(
            "store root '{}' does not exist. Run `blackboard init` first.",
            root.display()
        )));
    }
    Store::open(&root)
}

fn init_store(root: &Path) -> Result<Store, BlackboardError> {
    let store = Store::open(root)?;
    for spec in [
        claims::CLAIMS_DB,
        artifacts::ARTIFACTS_DB,
        events::EVENTS_DB,
        decisions::DECISIONS_DB,
    ] {
        db::open_for_write(&spec, &store.root)?;
    }
    tracing::info!(root = %store.root.display(), "store initialized");
    Ok(store)
}

fn dispatch(cli: Cli) -> Result<(), BlackboardError> {
    match cli.command {
        Command::Init(InitCli { dir }) => {
            let root = match (cli.root, dir) {
                (Some(root), _) => root,
                (None, Some(dir)) => dir.join(store::STORE_DIR_NAME),
                (None, None) => std::env::current_dir()?.join(store::STORE_DIR_NAME),
            };
            let store = init_store(&root)?;
            println!(
                "{}",
                output::to_pretty_json(&serde_json::json!({
                    "root": store.root.to_string_lossy(),
                    "initialized": true,
                }))
            );
            Ok(())
        }
        Command::Hook(hook_cli) => {
            // Hooks never fail the triggering action, not even for a missing store.
            match open_existing(cli.root) {
                Ok(store) => hooks::run_hook_cli(&store, hook_cli),
                Err(e) => {
                    tracing::warn!(error = %e, "hook skipped; no store");
                    Ok(())
                }
            }
        }
        Command::Schema => {
            let schemas = serde_json::json!({
                "name": "blackboard",
                "version": env!("CARGO_PKG_VERSION"),
                "subsystems": [
                    claims::schema(),
                    artifacts::schema(),
                    events::schema(),
                    decisions::schema(),
                    session::schema(),
                ]
            });
            println!("{}", output::to_pretty_json(&schemas));
            Ok(())
        }
        Command::Claim(c) => claims::run_claim_cli(&open_existing(cli.root)?, c),
        Command::Artifact(c) => artifacts::run_artifact_cli(&open_existing(cli.root)?, c),
        Command::Events(c) => events::run_events_cli(&open_existing(cli.root)?, c),
        Command::Decision(c) => decisions::run_decision_cli(&open_existing(cli.root)?, c),
        Command::Session(c) => session::run_session_cli(&open_existing(cli.root)?, c),
        Command::Config(c) => {
            let store = open_existing(cli.root)?;
            match c.command {
                ConfigCommand::Show => print!("{}", store.config.to_toml()),
            }
            Ok(())
        }
    }
}
