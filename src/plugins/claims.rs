//! Advisory resource claims.
//!
//! A claim says "holder H, working for scope S, is editing path P since T". Nothing on disk
//! enforces it; agents honor it by convention. The store only guarantees that at most one
//! claim per path is live at a time and that a claim older than the staleness threshold can
//! be taken over. `acquire` never waits: a live foreign claim comes back as
//! [`AcquireOutcome::Conflict`] and the caller decides whether to wait, escalate, or abort.

use crate::core::broker::DbBroker;
use crate::core::db::DbSpec;
use crate::core::error::BlackboardError;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::events::{self, EventLog, NewEvent};
use clap::{Parser, Subcommand};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CLAIMS_DB: DbSpec = DbSpec {
    name: schemas::CLAIMS_DB_NAME,
    schema: schemas::CLAIMS_DB_SCHEMA,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub path: String,
    pub holder: String,
    pub scope: String,
    pub acquired_at: u64,
}

impl Claim {
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.acquired_at)
    }
}

/// A claim as seen at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimView {
    #[serde(flatten)]
    pub claim: Claim,
    pub age_secs: u64,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcquireOutcome {
    Acquired {
        claim: Claim,
        /// The stale claim this acquisition took over, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        superseded: Option<Claim>,
    },
    Conflict {
        holder: String,
        scope: String,
        age_secs: u64,
    },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ClaimStore {
    root: PathBuf,
    stale_after: u64,
    events: EventLog,
}

fn row_to_claim(row: &rusqlite::Row<'_>) -> rusqlite::Result<Claim> {
    Ok(Claim {
        path: row.get(0)?,
        holder: row.get(1)?,
        scope: row.get(2)?,
        acquired_at: row.get::<_, i64>(3)? as u64,
    })
}

impl ClaimStore {
    pub fn new(store: &Store) -> Self {
        Self::with_threshold(
            &store.root,
            store.config.claims.stale_after_secs,
            EventLog::new(store),
        )
    }

    pub fn with_threshold(root: &Path, stale_after_secs: u64, events: EventLog) -> Self {
        Self {
            root: root.to_path_buf(),
            stale_after: stale_after_secs,
            events,
        }
    }

    pub fn stale_after(&self) -> u64 {
        self.stale_after
    }

    fn broker(&self) -> DbBroker {
        DbBroker::new(&self.root)
    }

    fn is_stale(&self, claim: &Claim, now: u64) -> bool {
        claim.age(now) >= self.stale_after
    }

    /// Claim `path` for `holder`. Re-acquiring one's own claim refreshes it.
    pub fn acquire(
        &self,
        path: &str,
        holder: &str,
        scope: &str,
        now: u64,
    ) -> Result<AcquireOutcome, BlackboardError> {
        if path.trim().is_empty() || holder.trim().is_empty() {
            return Err(BlackboardError::ValidationError(
                "claim path and holder are required".to_string(),
            ));
        }

        self.broker()
            .with_write(&CLAIMS_DB, holder, "claims.acquire", |tx| {
                let existing = tx
                    .query_row(
                        "SELECT path, holder, scope, acquired_at FROM claims WHERE path = ?1",
                        params![path],
                        row_to_claim,
                    )
                    .optional()?;

                let superseded = match existing {
                    Some(current) if current.holder != holder && !self.is_stale(&current, now) => {
                        return Ok(AcquireOutcome::Conflict {
                            age_secs: current.age(now),
                            holder: current.holder,
                            scope: current.scope,
                        });
                    }
                    Some(current) if current.holder != holder => Some(current),
                    _ => None,
                };

                // Last writer wins per path, so a retried write converges to the same row.
                tx.execute(
                    "INSERT INTO claims(path, holder, scope, acquired_at) VALUES(?1, ?2, ?3, ?4)
                     ON CONFLICT(path) DO UPDATE SET holder = excluded.holder,
                         scope = excluded.scope, acquired_at = excluded.acquired_at",
                    params![path, holder, scope, now as i64],
                )?;
                let claim = Claim {
                    path: path.to_string(),
                    holder: holder.to_string(),
                    scope: scope.to_string(),
                    acquired_at: now,
                };

                // Lock order: claims, then events. A failed append rolls the claim back.
                if let Some(previous) = &superseded {
                    tracing::info!(
                        path,
                        previous_holder = %previous.holder,
                        holder,
                        age_secs = previous.age(now),
                        "stale claim superseded"
                    );
                    self.events.append(NewEvent::new(
                        events::CLAIM_SUPERSEDED,
                        serde_json::json!({
                            "path": path,
                            "previous_holder": previous.holder,
                            "previous_scope": previous.scope,
                            "previous_acquired_at": previous.acquired_at,
                            "holder": holder,
                        }),
                        now,
                    ))?;
                }
                self.events.append(NewEvent::new(
                    events::CLAIM_ACQUIRED,
                    serde_json::to_value(&claim)?,
                    now,
                ))?;

                Ok(AcquireOutcome::Acquired { claim, superseded })
            })
    }

    /// Release `path` if `holder` owns it. Returns whether a claim was removed; a missing or
    /// foreign claim is left untouched and is not an error.
    pub fn release(&self, path: &str, holder: &str, now: u64) -> Result<bool, BlackboardError> {
        let removed = self
            .broker()
            .with_write(&CLAIMS_DB, holder, "claims.release", |tx| {
                let changed = tx.execute(
                    "DELETE FROM claims WHERE path = ?1 AND holder = ?2",
                    params![path, holder],
                )?;
                if changed > 0 {
                    self.events.append(NewEvent::new(
                        events::CLAIM_RELEASED,
                        serde_json::json!({ "path": path, "holder": holder }),
                        now,
                    ))?;
                }
                Ok(changed > 0)
            })?;
        Ok(removed)
    }

    /// The live claim on `path`, if any.
    pub fn get(&self, path: &str, now: u64) -> Option<Claim> {
        let claim: Option<Claim> = self
            .broker()
            .read_or_default(&CLAIMS_DB, "claims.get", |conn| {
                Ok(conn
                    .query_row(
                        "SELECT path, holder, scope, acquired_at FROM claims WHERE path = ?1",
                        params![path],
                        row_to_claim,
                    )
                    .optional()?)
            });
        claim.filter(|c| !self.is_stale(c, now))
    }

    /// Every recorded claim, stale ones included, ordered by path.
    pub fn list(&self, now: u64) -> Vec<ClaimView> {
        let claims: Vec<Claim> = self
            .broker()
            .read_or_default(&CLAIMS_DB, "claims.list", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT path, holder, scope, acquired_at FROM claims ORDER BY path ASC",
                )?;
                let rows = stmt.query_map([], row_to_claim)?;
                let mut out = Vec::new();
                for r in rows {
                    out.push(r?);
                }
                Ok(out)
            });
        claims
            .into_iter()
            .map(|claim| ClaimView {
                age_secs: claim.age(now),
                stale: self.is_stale(&claim, now),
                claim,
            })
            .collect()
    }

    /// Live claims only.
    pub fn live(&self, now: u64) -> Vec<Claim> {
        self.list(now)
            .into_iter()
            .filter(|v| !v.stale)
            .map(|v| v.claim)
            .collect()
    }
}

#[derive(Parser, Debug)]
pub struct ClaimCli {
    #[clap(subcommand)]
    pub command: ClaimCommand,
}

#[derive(Subcommand, Debug)]
pub enum ClaimCommand {
    /// Claim a path. Prints `acquired` or `conflict`; never waits.
    Acquire {
        path: String,
        #[clap(long)]
        holder: String,
        /// Owning task or plan scope (e.g. `02/03/2`).
        #[clap(long, default_value = "")]
        scope: String,
    },
    /// Release a claim held by `holder`. Releasing someone else's claim is a no-op.
    Release {
        path: String,
        #[clap(long)]
        holder: String,
    },
    /// List all claims with age and staleness.
    List,
    /// Show the live claim on a path.
    Show { path: String },
}

pub fn run_claim_cli(store: &Store, cli: ClaimCli) -> Result<(), BlackboardError> {
    let claims = ClaimStore::new(store);
    let now = time::now_epoch_secs();
    match cli.command {
        ClaimCommand::Acquire {
            path,
            holder,
            scope,
        } => {
            let outcome = claims.acquire(&path, &holder, &scope, now)?;
            println!("{}", output::to_pretty_json(&outcome));
        }
        ClaimCommand::Release { path, holder } => {
            let released = claims.release(&path, &holder, now)?;
            println!(
                "{}",
                output::to_pretty_json(&serde_json::json!({
                    "path": path,
                    "holder": holder,
                    "released": released,
                }))
            );
        }
        ClaimCommand::List => {
            println!("{}", output::to_pretty_json(&claims.list(now)));
        }
        ClaimCommand::Show { path } => {
            let claim = claims
                .get(&path, now)
                .ok_or_else(|| BlackboardError::NotFound(format!("no live claim on '{}'", path)))?;
            println!("{}", output::to_pretty_json(&claim));
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "claims",
        "version": "0.1.0",
        "description": "Advisory, time-bounded resource claims",
        "commands": [
            { "name": "acquire", "description": "Claim a path; returns acquired or conflict", "parameters": ["path", "holder", "scope"] },
            { "name": "release", "description": "Release a held claim (idempotent)", "parameters": ["path", "holder"] },
            { "name": "list", "description": "List claims with age and staleness" },
            { "name": "show", "description": "Show the live claim on a path", "parameters": ["path"] }
        ],
        "storage": [schemas::CLAIMS_DB_NAME]
    })
}
