//! Task tiering is a policy table, not coordination logic.
//!
//! Callers that pick an agent or model tier per task inject a [`TaskClassifier`]; nothing in
//! the claim, artifact, event, decision, or session stores consults it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Light,
    Standard,
    Heavy,
}

#[derive(Debug, Clone, Default)]
pub struct TaskDescriptor {
    pub title: String,
    pub description: String,
    pub files_touched: usize,
}

pub trait TaskClassifier {
    fn classify(&self, task: &TaskDescriptor) -> Tier;
}

/// Keyword lookup: the highest tier whose keyword appears in the title or description wins;
/// `Standard` when nothing matches.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    table: Vec<(Tier, Vec<String>)>,
}

impl KeywordClassifier {
    pub fn new(table: Vec<(Tier, Vec<String>)>) -> Self {
        Self { table }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let words = |ws: &[&str]| ws.iter().map(|w| w.to_string()).collect::<Vec<_>>();
        Self::new(vec![
            (
                Tier::Heavy,
                words(&["architecture", "migration", "security", "concurrency", "refactor"]),
            ),
            (Tier::Light, words(&["typo", "rename", "format", "docs", "comment"])),
        ])
    }
}

impl TaskClassifier for KeywordClassifier {
    fn classify(&self, task: &TaskDescriptor) -> Tier {
        let haystack = format!("{} {}", task.title, task.description).to_lowercase();
        self.table
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k.as_str())))
            .map(|(tier, _)| *tier)
            .max()
            .unwrap_or(Tier::Standard)
    }
}
