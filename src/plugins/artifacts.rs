//! Artifact registry: a DAG of produced outputs and the paths they depend on.
//!
//! Artifacts are keyed by a SHA-256 of their path. Registering an existing path merges the
//! dependency sets and bumps the version. Dependencies may name paths that are not
//! registered yet; when such a path is later registered, every artifact waiting on it gets a
//! `dependency:satisfied` event.
//!
//! Acyclicity is a hard invariant. A registration that would close a cycle is rejected
//! before anything is written.

use crate::core::broker::DbBroker;
use crate::core::db::DbSpec;
use crate::core::error::BlackboardError;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::events::{self, EventLog, NewEvent};
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

pub const ARTIFACTS_DB: DbSpec = DbSpec {
    name: schemas::ARTIFACTS_DB_NAME,
    schema: schemas::ARTIFACTS_DB_SCHEMA,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub path_hash: String,
    pub kind: String,
    pub exports: BTreeSet<String>,
    pub scope: String,
    pub dependencies: BTreeSet<String>,
    pub version: u64,
    pub registered_at: u64,
    pub updated_at: u64,
}

/// What a producer declares when registering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub path: String,
    pub kind: String,
    #[serde(default)]
    pub exports: BTreeSet<String>,
    pub scope: String,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

impl ArtifactSpec {
    pub fn new(path: &str, kind: &str, scope: &str) -> Self {
        Self {
            path: path.to_string(),
            kind: kind.to_string(),
            scope: scope.to_string(),
            ..Default::default()
        }
    }

    pub fn depends_on(mut self, path: &str) -> Self {
        self.dependencies.insert(path.to_string());
        self
    }

    pub fn exporting(mut self, symbol: &str) -> Self {
        self.exports.insert(symbol.to_string());
        self
    }
}

pub fn path_hash(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    root: PathBuf,
    events: EventLog,
}

const SELECT_ARTIFACT: &str =
    "SELECT path_hash, path, kind, exports, scope, version, registered_at, updated_at FROM artifacts";

fn load_artifact_row(
    conn: &Connection,
    row: &rusqlite::Row<'_>,
) -> Result<Artifact, BlackboardError> {
    let path_hash: String = row.get(0)?;
    let exports_json: String = row.get(3)?;
    let exports: BTreeSet<String> = serde_json::from_str(&exports_json).unwrap_or_else(|e| {
        tracing::warn!(
            path_hash = %path_hash,
            error = %e,
            "artifact exports malformed; treating as empty"
        );
        BTreeSet::new()
    });
    let dependencies = load_dependencies(conn, &path_hash)?;
    Ok(Artifact {
        path: row.get(1)?,
        kind: row.get(2)?,
        exports,
        scope: row.get(4)?,
        dependencies,
        version: row.get::<_, i64>(5)? as u64,
        registered_at: row.get::<_, i64>(6)? as u64,
        updated_at: row.get::<_, i64>(7)? as u64,
        path_hash,
    })
}

fn load_dependencies(conn: &Connection, hash: &str) -> Result<BTreeSet<String>, BlackboardError> {
    let mut stmt = conn.prepare("SELECT dep_path FROM artifact_deps WHERE artifact_hash = ?1")?;
    let rows = stmt.query_map(params![hash], |row| row.get::<_, String>(0))?;
    let mut out = BTreeSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}

fn query_artifacts(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Artifact>, BlackboardError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(load_artifact_row(conn, row)?);
    }
    Ok(out)
}

fn dependents_of(conn: &Connection, path: &str) -> Result<Vec<Artifact>, BlackboardError> {
    let sql = format!(
        "{} WHERE path_hash IN (SELECT artifact_hash FROM artifact_deps WHERE dep_path = ?1)
         ORDER BY path ASC",
        SELECT_ARTIFACT
    );
    query_artifacts(conn, &sql, &[&path])
}

/// Whole dependency graph: artifact path -> dependency paths.
fn load_graph(conn: &Connection) -> Result<BTreeMap<String, BTreeSet<String>>, BlackboardError> {
    let mut stmt = conn.prepare(
        "SELECT a.path, d.dep_path FROM artifact_deps d JOIN artifacts a ON a.path_hash = d.artifact_hash",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for r in rows {
        let (from, to) = r?;
        graph.entry(from).or_default().insert(to);
    }
    Ok(graph)
}

/// Path from `start` to `target` following dependency edges, if one exists.
fn find_path(
    graph: &BTreeMap<String, BTreeSet<String>>,
    start: &str,
    target: &str,
) -> Option<Vec<String>> {
    let mut stack: Vec<(String, Vec<String>)> = vec![(start.to_string(), vec![start.to_string()])];
    let mut visited: HashSet<String> = HashSet::new();
    while let Some((node, trail)) = stack.pop() {
        if node == target {
            return Some(trail);
        }
        if !visited.insert(node.clone()) {
            continue;
        }
        if let Some(next) = graph.get(&node) {
            for dep in next.iter().rev() {
                if !visited.contains(dep) {
                    let mut t = trail.clone();
                    t.push(dep.clone());
                    stack.push((dep.clone(), t));
                }
            }
        }
    }
    None
}

impl ArtifactRegistry {
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

    /// Upsert by path. Returns the resulting record, or `CycleDetected` without writing.
    pub fn register(&self, spec: &ArtifactSpec, now: u64) -> Result<Artifact, BlackboardError> {
        if spec.path.trim().is_empty() || spec.kind.trim().is_empty() {
            return Err(BlackboardError::ValidationError(
                "artifact path and kind are required".to_string(),
            ));
        }
        let hash = path_hash(&spec.path);
        let exports_json = serde_json::to_string(&spec.exports)?;

        self.broker()
            .with_write(&ARTIFACTS_DB, &spec.scope, "artifacts.register", |tx| {
                let existing = tx
                    .query_row(
                        "SELECT version, registered_at FROM artifacts WHERE path_hash = ?1",
                        params![hash],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()?;
                let mut dependencies = load_dependencies(tx, &hash)?;
                dependencies.extend(spec.dependencies.iter().cloned());

                // Adding edges path -> dep closes a cycle iff dep already reaches path.
                let mut graph = load_graph(tx)?;
                graph.insert(spec.path.clone(), dependencies.clone());
                for dep in &spec.dependencies {
                    if let Some(mut trail) = find_path(&graph, dep, &spec.path) {
                        trail.insert(0, spec.path.clone());
                        return Err(BlackboardError::CycleDetected {
                            path: spec.path.clone(),
                            cycle: trail,
                        });
                    }
                }

                let (version, registered_at) = match existing {
                    Some((version, registered_at)) => {
                        tx.execute(
                            "UPDATE artifacts SET kind = ?1, exports = ?2, scope = ?3,
                                 version = version + 1, updated_at = ?4
                             WHERE path_hash = ?5",
                            params![spec.kind, exports_json, spec.scope, now as i64, hash],
                        )?;
                        (version as u64 + 1, registered_at as u64)
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO artifacts(path_hash, path, kind, exports, scope, version,
                                 registered_at, updated_at)
                             VALUES(?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                            params![
                                hash,
                                spec.path,
                                spec.kind,
                                exports_json,
                                spec.scope,
                                now as i64
                            ],
                        )?;
                        (1, now)
                    }
                };
                for dep in &spec.dependencies {
                    tx.execute(
                        "INSERT OR IGNORE INTO artifact_deps(artifact_hash, dep_path) VALUES(?1, ?2)",
                        params![hash, dep],
                    )?;
                }

                let artifact = Artifact {
                    path: spec.path.clone(),
                    path_hash: hash.clone(),
                    kind: spec.kind.clone(),
                    exports: spec.exports.clone(),
                    scope: spec.scope.clone(),
                    dependencies,
                    version,
                    registered_at,
                    updated_at: now,
                };

                // Lock order: artifacts, then events. A failed append rolls the registration back.
                self.events.append(NewEvent::new(
                    events::ARTIFACT_REGISTERED,
                    serde_json::json!({
                        "path": artifact.path,
                        "kind": artifact.kind,
                        "scope": artifact.scope,
                        "version": artifact.version,
                        "dependencies": artifact.dependencies,
                    }),
                    now,
                ))?;
                for dependent in dependents_of(tx, &artifact.path)? {
                    self.events.append(NewEvent::new(
                        events::DEPENDENCY_SATISFIED,
                        serde_json::json!({
                            "dependency": artifact.path,
                            "dependency_version": artifact.version,
                            "dependent": dependent.path,
                            "scope": dependent.scope,
                        }),
                        now,
                    ))?;
                }
                Ok(artifact)
            })
    }

    /// Every artifact whose dependency set contains `path`, ordered by path.
    pub fn dependents(&self, path: &str) -> Vec<Artifact> {
        self.broker()
            .read_or_default(&ARTIFACTS_DB, "artifacts.dependents", |conn| {
                dependents_of(conn, path)
            })
    }

    pub fn get(&self, path: &str) -> Option<Artifact> {
        let hash = path_hash(path);
        let found: Vec<Artifact> = self
            .broker()
            .read_or_default(&ARTIFACTS_DB, "artifacts.get", |conn| {
                let sql = format!("{} WHERE path_hash = ?1", SELECT_ARTIFACT);
                query_artifacts(conn, &sql, &[&hash])
            });
        found.into_iter().next()
    }

    pub fn list(&self) -> Vec<Artifact> {
        self.broker()
            .read_or_default(&ARTIFACTS_DB, "artifacts.list", |conn| {
                let sql = format!("{} ORDER BY path ASC", SELECT_ARTIFACT);
                query_artifacts(conn, &sql, &[])
            })
    }
}

#[derive(Parser, Debug)]
pub struct ArtifactCli {
    #[clap(subcommand)]
    pub command: ArtifactCommand,
}

#[derive(Subcommand, Debug)]
pub enum ArtifactCommand {
    /// Register (or re-register) an artifact.
    Register {
        path: String,
        #[clap(long)]
        kind: String,
        /// Producing scope.
        #[clap(long, default_value = "")]
        scope: String,
        /// Exported symbol (repeatable).
        #[clap(long = "export")]
        exports: Vec<String>,
        /// Dependency path (repeatable).
        #[clap(long = "depends-on")]
        depends_on: Vec<String>,
    },
    /// Show one artifact.
    Show { path: String },
    /// List all artifacts.
    List,
    /// Artifacts that depend on a path.
    Dependents { path: String },
}

pub fn run_artifact_cli(store: &Store, cli: ArtifactCli) -> Result<(), BlackboardError> {
    let registry = ArtifactRegistry::new(store);
    match cli.command {
        ArtifactCommand::Register {
            path,
            kind,
            scope,
            exports,
            depends_on,
        } => {
            let spec = ArtifactSpec {
                path,
                kind,
                exports: exports.into_iter().collect(),
                scope,
                dependencies: depends_on.into_iter().collect(),
            };
            let artifact = registry.register(&spec, time::now_epoch_secs())?;
            println!("{}", output::to_pretty_json(&artifact));
        }
        ArtifactCommand::Show { path } => {
            let artifact = registry
                .get(&path)
                .ok_or_else(|| {
                    BlackboardError::NotFound(format!("artifact '{}' not registered", path))
                })?;
            println!("{}", output::to_pretty_json(&artifact));
        }
        ArtifactCommand::List => {
            println!("{}", output::to_pretty_json(&registry.list()));
        }
        ArtifactCommand::Dependents { path } => {
            let paths: Vec<String> = registry
                .dependents(&path)
                .into_iter()
                .map(|a| a.path)
                .collect();
            println!("{}", output::to_pretty_json(&paths));
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "artifacts",
        "version": "0.1.0",
        "description": "Registry of produced artifacts and their dependency DAG",
        "commands": [
            { "name": "register", "description": "Upsert an artifact; rejects dependency cycles", "parameters": ["path", "kind", "scope", "export", "depends-on"] },
            { "name": "show", "description": "Show one artifact", "parameters": ["path"] },
            { "name": "list", "description": "List all artifacts" },
            { "name": "dependents", "description": "Artifacts depending on a path", "parameters": ["path"] }
        ],
        "storage": [schemas::ARTIFACTS_DB_NAME]
    })
}
