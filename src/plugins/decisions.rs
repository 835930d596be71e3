//! Decision ledger: append-only record of choices and the scopes they bind.

use crate::core::broker::DbBroker;
use crate::core::db::DbSpec;
use crate::core::error::BlackboardError;
use crate::core::output;
use crate::core::schemas;
use crate::core::scope;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::events::{self, EventLog, NewEvent};
use clap::{Parser, Subcommand};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DECISIONS_DB: DbSpec = DbSpec {
    name: schemas::DECISIONS_DB_NAME,
    schema: schemas::DECISIONS_DB_SCHEMA,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub statement: String,
    pub rationale: String,
    pub made_by: String,
    pub affects: Vec<String>,
    pub ts: u64,
}

impl Decision {
    /// Whether any affected scope matches `target`.
    pub fn affects_scope(&self, target: &str) -> bool {
        self.affects.iter().any(|pattern| scope::matches(pattern, target))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDecision {
    pub statement: String,
    pub rationale: String,
    pub made_by: String,
    #[serde(default)]
    pub affects: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DecisionLedger {
    root: PathBuf,
    events: EventLog,
}

type DecisionRow = (String, String, String, String, String, i64);

fn row_to_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<DecisionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn query_decisions(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Decision>, BlackboardError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, row_to_decision)?;
    let mut out = Vec::new();
    for r in rows {
        let (id, statement, rationale, made_by, affects_json, ts) = r?;
        let affects: Vec<String> = serde_json::from_str(&affects_json).unwrap_or_else(|e| {
            tracing::warn!(id = %id, error = %e, "decision scopes malformed; treating as empty");
            Vec::new()
        });
        out.push(Decision {
            id,
            statement,
            rationale,
            made_by,
            affects,
            ts: ts as u64,
        });
    }
    Ok(out)
}

const SELECT_DECISION: &str = "SELECT id, statement, rationale, made_by, affects, ts FROM decisions";

impl DecisionLedger {
    pub fn new(store: &Store) -> Self {
        Self::with_events(&store.root, EventLog::new(store))
    }

    pub fn with_events(root: &Path, events: EventLog) -> Self {
        Self {
            root: root.to_path_buf(),
            events,
        }
    }

    fn broker(&self) -> DbBroker {
        DbBroker::new(&self.root)
    }

    pub fn record(&self, new: &NewDecision, now: u64) -> Result<Decision, BlackboardError> {
        let missing: Vec<&str> = [
            ("statement", &new.statement),
            ("rationale", &new.rationale),
            ("made_by", &new.made_by),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();
        if !missing.is_empty() {
            return Err(BlackboardError::ValidationError(format!(
                "decision is missing required fields: {}",
                missing.join(", ")
            )));
        }

        let decision = Decision {
            id: format!("DEC_{}", time::ulid_at(now)),
            statement: new.statement.trim().to_string(),
            rationale: new.rationale.trim().to_string(),
            made_by: new.made_by.trim().to_string(),
            affects: new
                .affects
                .iter()
                .map(|s| scope::normalize(s).to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            ts: now,
        };
        let affects_json = serde_json::to_string(&decision.affects)?;

        self.broker()
            .with_write(&DECISIONS_DB, &decision.made_by, "decisions.record", |tx| {
                tx.execute(
                    "INSERT INTO decisions(id, statement, rationale, made_by, affects, ts)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        decision.id,
                        decision.statement,
                        decision.rationale,
                        decision.made_by,
                        affects_json,
                        decision.ts as i64
                    ],
                )?;
                // Lock order: decisions, then events. A failed append rolls the insert back.
                self.events.append(NewEvent::new(
                    events::DECISION_RECORDED,
                    serde_json::to_value(&decision)?,
                    now,
                ))?;
                Ok(())
            })?;

        tracing::info!(id = %decision.id, made_by = %decision.made_by, "decision recorded");
        Ok(decision)
    }

    /// Every decision in recording order.
    pub fn list(&self) -> Vec<Decision> {
        self.broker()
            .read_or_default(&DECISIONS_DB, "decisions.list", |conn| {
                let sql = format!("{} ORDER BY seq ASC", SELECT_DECISION);
                query_decisions(conn, &sql, &[])
            })
    }

    pub fn get(&self, id: &str) -> Option<Decision> {
        let found: Vec<Decision> = self
            .broker()
            .read_or_default(&DECISIONS_DB, "decisions.get", |conn| {
                let sql = format!("{} WHERE id = ?1", SELECT_DECISION);
                query_decisions(conn, &sql, &[&id])
            });
        found.into_iter().next()
    }

    /// The last `k` decisions, oldest first.
    pub fn recent(&self, k: usize) -> Vec<Decision> {
        if k == 0 {
            return Vec::new();
        }
        let mut newest_first: Vec<Decision> = self
            .broker()
            .read_or_default(&DECISIONS_DB, "decisions.recent", |conn| {
                let sql = format!("{} ORDER BY seq DESC LIMIT ?1", SELECT_DECISION);
                query_decisions(conn, &sql, &[&(k as i64)])
            });
        newest_first.reverse();
        newest_first
    }

    /// Decisions with an affected scope matching `target`, in recording order.
    pub fn affecting(&self, target: &str) -> Vec<Decision> {
        let target = scope::normalize(target);
        self.list()
            .into_iter()
            .filter(|d| d.affects_scope(target))
            .collect()
    }
}

#[derive(Parser, Debug)]
pub struct DecisionCli {
    #[clap(subcommand)]
    pub command: DecisionCommand,
}

#[derive(Subcommand, Debug)]
pub enum DecisionCommand {
    /// Record a decision. Decisions are never deleted.
    Record {
        statement: String,
        #[clap(long)]
        rationale: String,
        #[clap(long)]
        made_by: String,
        /// Affected scope (repeatable); `*` and trailing `*` wildcards are allowed.
        #[clap(long = "affects")]
        affects: Vec<String>,
    },
    /// List decisions, optionally only the last N.
    List {
        #[clap(long)]
        recent: Option<usize>,
    },
    /// Decisions affecting a scope.
    Affecting { scope: String },
    /// Show one decision.
    Show { id: String },
}

pub fn run_decision_cli(store: &Store, cli: DecisionCli) -> Result<(), BlackboardError> {
    let ledger = DecisionLedger::new(store);
    match cli.command {
        DecisionCommand::Record {
            statement,
            rationale,
            made_by,
            affects,
        } => {
            let new = NewDecision {
                statement,
                rationale,
                made_by,
                affects,
            };
            let decision = ledger.record(&new, time::now_epoch_secs())?;
            println!("{}", output::to_pretty_json(&decision));
        }
        DecisionCommand::List { recent } => {
            let decisions = match recent {
                Some(k) => ledger.recent(k),
                None => ledger.list(),
            };
            println!("{}", output::to_pretty_json(&decisions));
        }
        DecisionCommand::Affecting { scope } => {
            println!("{}", output::to_pretty_json(&ledger.affecting(&scope)));
        }
        DecisionCommand::Show { id } => {
            let decision = ledger
                .get(&id)
                .ok_or_else(|| BlackboardError::NotFound(format!("decision '{}' not found", id)))?;
            println!("{}", output::to_pretty_json(&decision));
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "decisions",
        "version": "0.1.0",
        "description": "Append-only decision ledger with scope queries",
        "commands": [
            { "name": "record", "description": "Record a decision", "parameters": ["statement", "rationale", "made-by", "affects"] },
            { "name": "list", "description": "List decisions (optionally only the last N)", "parameters": ["recent"] },
            { "name": "affecting", "description": "Decisions whose affected scopes match a scope", "parameters": ["scope"] },
            { "name": "show", "description": "Show one decision", "parameters": ["id"] }
        ],
        "storage": [schemas::DECISIONS_DB_NAME]
    })
}
