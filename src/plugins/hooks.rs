//! Trigger points for editors, VCS hooks, and agent runtimes.
//!
//! Both hooks record an event and request a snapshot. They return nothing: a failure here
//! must never change the outcome of the mutation or commit that fired them, so every error
//! is logged and dropped.

use crate::core::error::BlackboardError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::events::{self, EventLog, NewEvent};
use crate::plugins::session::{SessionSnapshotter, SnapshotOutcome, Trigger};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

fn fire(store: &Store, hook: &str, kind: &str, payload: serde_json::Value, now: u64) {
    match EventLog::new(store).append(NewEvent::new(kind, payload, now)) {
        Ok(event) => tracing::debug!(hook, event_id = event.id, "hook event recorded"),
        Err(e) => tracing::warn!(hook, error = %e, "hook event not recorded"),
    }
    match SessionSnapshotter::for_store(store).snapshot(Trigger::Hook, now) {
        Ok(SnapshotOutcome::Written { snapshot }) => {
            tracing::debug!(hook, id = %snapshot.id, "hook snapshot written")
        }
        Ok(SnapshotOutcome::Unchanged { .. }) => {}
        Err(e) => tracing::warn!(hook, error = %e, "hook snapshot failed"),
    }
}

/// After a resource was created or modified.
pub fn post_mutation(store: &Store, path: &str, now: u64) {
    fire(
        store,
        "post_mutation",
        events::RESOURCE_MUTATED,
        serde_json::json!({ "path": path }),
        now,
    );
}

/// After a commit was observed in the working tree.
pub fn commit_observed(store: &Store, commit: &str, now: u64) {
    fire(
        store,
        "commit_observed",
        events::COMMIT_OBSERVED,
        serde_json::json!({ "commit": commit }),
        now,
    );
}

fn open_in_thread<F>(root: PathBuf, name: &'static str, f: F) -> JoinHandle<()>
where
    F: FnOnce(&Store) + Send + 'static,
{
    thread::spawn(move || {
        let opened: Result<Store, BlackboardError> = Store::open(&root);
        match opened {
            Ok(store) => f(&store),
            Err(e) => tracing::warn!(hook = name, error = %e, "hook could not open store"),
        }
    })
}

/// [`post_mutation`] on a background thread, so the caller never waits on the snapshot.
pub fn spawn_post_mutation(root: PathBuf, path: String) -> JoinHandle<()> {
    open_in_thread(root, "post_mutation", move |store| {
        post_mutation(store, &path, time::now_epoch_secs())
    })
}

/// [`commit_observed`] on a background thread.
pub fn spawn_commit_observed(root: PathBuf, commit: String) -> JoinHandle<()> {
    open_in_thread(root, "commit_observed", move |store| {
        commit_observed(store, &commit, time::now_epoch_secs())
    })
}

#[derive(Parser, Debug)]
pub struct HookCli {
    #[clap(subcommand)]
    pub command: HookCommand,
}

#[derive(Subcommand, Debug)]
pub enum HookCommand {
    /// A resource was created or modified.
    PostMutation { path: String },
    /// A commit was observed.
    CommitObserved { commit: String },
}

/// Hooks never fail the caller; this always returns `Ok`.
pub fn run_hook_cli(store: &Store, cli: HookCli) -> Result<(), BlackboardError> {
    let now = time::now_epoch_secs();
    match cli.command {
        HookCommand::PostMutation { path } => post_mutation(store, &path, now),
        HookCommand::CommitObserved { commit } => commit_observed(store, &commit, now),
    }
    Ok(())
}
