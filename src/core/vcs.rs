//! Version-control status source.
//!
//! The snapshotter needs three facts from version control: the commit the working tree is
//! based on, the set of paths that differ from it (with change sizes), and whether a
//! previously recorded commit is still reachable. [`GitCli`] answers them by shelling out
//! to `git`.

use crate::core::error::BlackboardError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Untracked => "untracked",
        }
    }
}

/// One path that differs from the last commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedChange {
    /// Path relative to the working-tree root.
    pub path: String,
    pub kind: ChangeKind,
    pub lines_added: u64,
    pub lines_removed: u64,
}

impl UncommittedChange {
    pub fn change_size(&self) -> u64 {
        self.lines_added + self.lines_removed
    }
}

pub trait VcsStatus {
    /// Root of the working tree that uncommitted paths are relative to.
    fn workdir(&self) -> &Path;
    /// The current commit, or `None` for a repository without commits.
    fn head(&self) -> Result<Option<String>, BlackboardError>;
    /// Paths that differ from `head`, sorted by path.
    fn uncommitted(&self) -> Result<Vec<UncommittedChange>, BlackboardError>;
    /// Whether `commit` still exists and is reachable from HEAD or any ref.
    fn is_reachable(&self, commit: &str) -> Result<bool, BlackboardError>;
}

/// [`VcsStatus`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
        }
    }

    fn output(&self, args: &[&str]) -> Result<std::process::Output, BlackboardError> {
        Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(["-c", "core.quotepath=false"])
            .args(args)
            .output()
            .map_err(|e| BlackboardError::VcsError(format!("git failed to start: {}", e)))
    }

    fn run(&self, args: &[&str]) -> Result<String, BlackboardError> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(BlackboardError::VcsError(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn succeeds(&self, args: &[&str]) -> Result<bool, BlackboardError> {
        Ok(self.output(args)?.status.success())
    }
}

impl VcsStatus for GitCli {
    fn workdir(&self) -> &Path {
        &self.repo_root
    }

    fn head(&self) -> Result<Option<String>, BlackboardError> {
        let output = self.output(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if sha.is_empty() { None } else { Some(sha) })
    }

    fn uncommitted(&self) -> Result<Vec<UncommittedChange>, BlackboardError> {
        let status = self.run(&["status", "--porcelain", "--untracked-files=all"])?;
        let numstat = if self.head()?.is_some() {
            parse_numstat(&self.run(&["diff", "--numstat", "HEAD"])?)
        } else {
            HashMap::new()
        };

        let mut changes: Vec<UncommittedChange> = parse_porcelain(&status)
            .into_iter()
            .map(|(path, kind)| {
                let (lines_added, lines_removed) = match kind {
                    ChangeKind::Untracked => (count_lines(&self.repo_root.join(&path)), 0),
                    _ => numstat.get(&path).copied().unwrap_or((0, 0)),
                };
                UncommittedChange {
                    path,
                    kind,
                    lines_added,
                    lines_removed,
                }
            })
            .collect();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(changes)
    }

    fn is_reachable(&self, commit: &str) -> Result<bool, BlackboardError> {
        let object = format!("{}^{{commit}}", commit);
        if !self.succeeds(&["cat-file", "-e", &object])? {
            return Ok(false);
        }
        if self.succeeds(&["merge-base", "--is-ancestor", commit, "HEAD"])? {
            return Ok(true);
        }
        let refs = self.run(&["for-each-ref", "--count=1", "--contains", commit])?;
        Ok(!refs.trim().is_empty())
    }
}

fn porcelain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([ MADRCUT?!])([ MADRCUT?!]) (.+)$").expect("porcelain pattern is valid")
    })
}

/// Parse `git status --porcelain` (v1) into `(path, kind)` pairs. Ignored entries are skipped.
pub fn parse_porcelain(output: &str) -> Vec<(String, ChangeKind)> {
    let mut out = Vec::new();
    for line in output.lines() {
        let Some(caps) = porcelain_re().captures(line) else {
            continue;
        };
        let (x, y, raw_path) = (&caps[1], &caps[2], &caps[3]);
        let kind = match (x, y) {
            ("?", "?") => ChangeKind::Untracked,
            ("!", "!") => continue,
            ("R", _) | (_, "R") => ChangeKind::Renamed,
            ("D", _) | (_, "D") => ChangeKind::Deleted,
            ("A", _) => ChangeKind::Added,
            _ => ChangeKind::Modified,
        };
        // Renames are reported as `old -> new`; the new path is the one that exists.
        let path = match raw_path.rsplit_once(" -> ") {
            Some((_, new_path)) if kind == ChangeKind::Renamed => new_path,
            _ => raw_path,
        };
        out.push((unquote(path), kind));
    }
    out
}

/// Parse `git diff --numstat` into `path -> (added, removed)`. Binary files count as zero.
pub fn parse_numstat(output: &str) -> HashMap<String, (u64, u64)> {
    let mut out = HashMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(added), Some(removed), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let path = match path.split_once(" => ") {
            Some((_, new_path)) => new_path.trim_end_matches('}').to_string(),
            None => path.to_string(),
        };
        out.insert(
            unquote(&path),
            (added.parse().unwrap_or(0), removed.parse().unwrap_or(0)),
        );
    }
    out
}

fn unquote(path: &str) -> String {
    path.trim_matches('"').to_string()
}

fn count_lines(path: &Path) -> u64 {
    fs::read(path)
        .map(|bytes| bytes.iter().filter(|b| **b == b'\n').count() as u64)
        .unwrap_or(0)
}
