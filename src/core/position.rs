//! Position source: where the agent currently is in the plan hierarchy, what blocks it, and
//! what it intends to do next.
//!
//! The blackboard only reads this document; planning tools own it. The default source is
//! `<root>/state.json`:
//!
//! ```json
//! {
//!   "position": { "phase": "02", "plan": "03", "task": 2, "status": "in_progress" },
//!   "blockers": [ { "id": "B1", "description": "waiting on schema review" } ],
//!   "next_actions": [ "finish users endpoint" ]
//! }
//! ```

use crate::core::error::BlackboardError;
use crate::core::scope;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Hierarchical locator plus a status tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<u32>,
    #[serde(default = "unknown_status")]
    pub status: String,
}

fn unknown_status() -> String {
    "unknown".to_string()
}

impl Default for Position {
    fn default() -> Self {
        Self {
            milestone: None,
            phase: None,
            plan: None,
            task: None,
            status: unknown_status(),
        }
    }
}

impl Position {
    /// The position as a scope string (`milestone/phase/plan/task`).
    pub fn scope(&self) -> String {
        let task = self.task.map(|t| t.to_string());
        scope::join(
            [
                self.milestone.as_deref(),
                self.phase.as_deref(),
                self.plan.as_deref(),
                task.as_deref(),
            ]
            .into_iter()
            .flatten(),
        )
    }

    /// One-line summary for listings: `phase 02 / plan 03 / task 2 [in_progress]`.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(m) = &self.milestone {
            parts.push(format!("milestone {}", m));
        }
        if let Some(p) = &self.phase {
            parts.push(format!("phase {}", p));
        }
        if let Some(p) = &self.plan {
            parts.push(format!("plan {}", p));
        }
        if let Some(t) = self.task {
            parts.push(format!("task {}", t));
        }
        if parts.is_empty() {
            format!("[{}]", self.status)
        } else {
            format!("{} [{}]", parts.join(" / "), self.status)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
}

/// The structured state document as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDocument {
    pub position: Position,
    pub blockers: Vec<Blocker>,
    pub next_actions: Vec<String>,
}

/// Read-only access to the external position/blocker state.
pub trait PositionSource {
    /// The current document, with whatever fallback the source applies for a missing or
    /// malformed one.
    fn read_state(&self) -> Result<StateDocument, BlackboardError>;

    /// The current document with no fallback. Retention uses this: a defaulted document
    /// would read as "every blocker resolved".
    fn read_state_strict(&self) -> Result<StateDocument, BlackboardError> {
        self.read_state()
    }
}

/// File-backed [`PositionSource`].
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl PositionSource for StateFile {
    /// A missing document is the default state. A malformed one is logged and read as the
    /// default state too; the snapshot then records status `unknown`.
    fn read_state(&self) -> Result<StateDocument, BlackboardError> {
        match self.read_state_strict() {
            Ok(doc) => Ok(doc),
            Err(BlackboardError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(StateDocument::default())
            }
            Err(BlackboardError::JsonError(e)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "state document malformed; using default position"
                );
                Ok(StateDocument::default())
            }
            Err(e) => Err(e),
        }
    }

    fn read_state_strict(&self) -> Result<StateDocument, BlackboardError> {
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str::<StateDocument>(&content)?)
    }
}

/// Fixed in-memory state; used by embedders that already hold the document.
impl PositionSource for StateDocument {
    fn read_state(&self) -> Result<StateDocument, BlackboardError> {
        Ok(self.clone())
    }
}
