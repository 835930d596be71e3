//! Session snapshots: recoverable checkpoints of an agent's working position.
//!
//! A snapshot aggregates the position document, the working-tree diff against the last
//! commit, the trailing decisions, the live claims, and the event high-water mark. It is
//! written twice (JSON record + Markdown summary), each via temp file, fsync, and rename;
//! the `LATEST` pointer is replaced only after both are durable. Snapshots are immutable
//! once written. Operator verdicts ("treat as stale") live in a marker file beside them.
//!
//! Layout under the store root:
//!
//! ```text
//! sessions/
//!   LATEST                 id of the most recent snapshot
//!   S_<ulid>.json          structured record
//!   S_<ulid>.md            human summary
//!   S_<ulid>.stale         optional operator marker
//!   archive/               snapshots past the archive age
//! ```

use crate::core::error::BlackboardError;
use crate::core::output;
use crate::core::position::{Blocker, Position, PositionSource, StateFile};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time::{self, SECS_PER_DAY};
use crate::core::vcs::{ChangeKind, GitCli, UncommittedChange, VcsStatus};
use crate::plugins::artifacts::ArtifactRegistry;
use crate::plugins::claims::{Claim, ClaimStore};
use crate::plugins::decisions::{Decision, DecisionLedger};
use crate::plugins::events::{self, EventLog, NewEvent};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

pub const SNAPSHOT_ID_PREFIX: &str = "S_";

/// Lifecycle of one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPhase {
    NotStarted,
    Capturing,
    Written,
    Stale,
    Archived,
    Deleted,
}

impl SnapshotPhase {
    pub fn can_transition_to(self, next: SnapshotPhase) -> bool {
        use SnapshotPhase::*;
        matches!(
            (self, next),
            (NotStarted, Capturing)
                | (Capturing, Written)
                | (Written, Stale)
                | (Written, Archived)
                | (Written, Deleted)
                | (Stale, Archived)
                | (Stale, Deleted)
                | (Archived, Deleted)
        )
    }

    pub fn transition(self, next: SnapshotPhase) -> Result<SnapshotPhase, BlackboardError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(BlackboardError::ValidationError(format!(
                "illegal snapshot transition {:?} -> {:?}",
                self, next
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Explicit,
    Checkpoint,
    Periodic,
    Hook,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Explicit => "explicit",
            Trigger::Checkpoint => "checkpoint",
            Trigger::Periodic => "periodic",
            Trigger::Hook => "hook",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub created_at: u64,
    /// Seconds since the previous snapshot; `None` for the first one.
    #[serde(default)]
    pub since_previous_secs: Option<u64>,
    pub trigger: Trigger,
    pub position: Position,
    #[serde(default)]
    pub head_commit: Option<String>,
    #[serde(default)]
    pub uncommitted: Vec<UncommittedChange>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub blockers: Vec<Blocker>,
    #[serde(default)]
    pub next_actions: Vec<String>,
    #[serde(default)]
    pub last_event_id: u64,
    #[serde(default)]
    pub active_claims: Vec<Claim>,
    #[serde(default)]
    pub artifact_count: usize,
    pub fingerprint: String,
}

impl SessionSnapshot {
    pub fn uncommitted_paths(&self) -> Vec<&str> {
        self.uncommitted.iter().map(|c| c.path.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SnapshotOutcome {
    Written { snapshot: Box<SessionSnapshot> },
    /// Periodic trigger found nothing new since `latest`.
    Unchanged { latest: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Latest,
    Written,
    Stale,
    Archived,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Latest => "latest",
            SnapshotStatus::Written => "written",
            SnapshotStatus::Stale => "stale",
            SnapshotStatus::Archived => "archived",
        }
    }
}

/// One row of the session listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotListing {
    pub id: String,
    pub created_at: u64,
    pub date: String,
    pub position: String,
    pub status: SnapshotStatus,
    pub since_previous_secs: Option<u64>,
    pub duration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// Recorded as changed but no longer on disk.
    MissingFile { path: String },
    /// Recorded as deleted but present again.
    UnexpectedlyPresent { path: String },
    /// On disk (or absent) as recorded, but no longer differs from the last commit.
    NoLongerModified { path: String },
    UnreachableCommit { commit: String },
    HeadMoved { recorded: Option<String>, current: Option<String> },
    /// Version control could not be queried, so the check could not be made.
    VcsUnavailable { check: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    Pointer,
    /// The pointer was missing or dangling; the newest snapshot on disk was used.
    Newest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub snapshot: SessionSnapshot,
    pub source: RecoverySource,
    pub marked_stale: bool,
    pub discrepancies: Vec<Discrepancy>,
}

impl RecoveryReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub archived: Vec<String>,
    pub deleted: Vec<String>,
    /// Past the delete age but kept for open blockers or outstanding changes.
    pub retained: Vec<String>,
}

/// Location of a snapshot on disk.
#[derive(Debug, Clone)]
struct Located {
    id: String,
    dir: PathBuf,
    archived: bool,
}

impl Located {
    fn file(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.id, ext))
    }
}

// Serializes snapshot writers inside one process; renames keep cross-process readers safe.
static SNAPSHOT_WRITE_LOCK: Mutex<()> = Mutex::new(());
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to `path` so that readers see either the old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BlackboardError> {
    let dir = path
        .parent()
        .ok_or_else(|| {
            BlackboardError::ValidationError(format!("no parent for {}", path.display()))
        })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dir.join(format!(
        ".{}.tmp-{}-{}",
        name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    // Persist the rename itself; not every platform can open a directory for sync.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

fn validate_id(id: &str) -> Result<(), BlackboardError> {
    let ok = id.starts_with(SNAPSHOT_ID_PREFIX)
        && id.len() > SNAPSHOT_ID_PREFIX.len()
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(BlackboardError::ValidationError(format!("invalid snapshot id '{}'", id)))
    }
}

fn read_snapshot(path: &Path) -> Result<SessionSnapshot, BlackboardError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn remove_if_exists(path: &Path) -> Result<(), BlackboardError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// SHA-256 over the capturable state. The event high-water mark is left out because every
/// snapshot appends an event of its own.
pub fn fingerprint(snapshot: &SessionSnapshot) -> String {
    let material = serde_json::json!({
        "position": snapshot.position,
        "head_commit": snapshot.head_commit,
        "uncommitted": snapshot.uncommitted,
        "decisions": snapshot.decisions.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
        "blockers": snapshot.blockers,
        "next_actions": snapshot.next_actions,
        "active_claims": snapshot
            .active_claims
            .iter()
            .map(|c| (c.path.as_str(), c.holder.as_str()))
            .collect::<Vec<_>>(),
        "artifact_count": snapshot.artifact_count,
    });
    let mut hasher = Sha256::new();
    hasher.update(material.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Markdown rendering of a snapshot for humans resuming work.
pub fn render_summary(s: &SessionSnapshot) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Session {}\n", s.id);
    let _ = writeln!(md, "- Captured: {} UTC", time::format_utc(s.created_at));
    let _ = writeln!(md, "- Trigger: {}", s.trigger.as_str());
    let _ = writeln!(
        md,
        "- Since previous: {}",
        s.since_previous_secs
            .map(time::format_duration)
            .unwrap_or_else(|| "first snapshot".to_string())
    );
    let _ = writeln!(md, "- Position: {}", s.position.summary());
    let _ = writeln!(md, "- Head: {}", s.head_commit.as_deref().unwrap_or("none"));
    let _ = writeln!(md, "- Last event: {}", s.last_event_id);
    let _ = writeln!(md, "- Artifacts registered: {}", s.artifact_count);

    let _ = writeln!(md, "\n## Uncommitted changes\n");
    if s.uncommitted.is_empty() {
        let _ = writeln!(md, "_None_");
    }
    for c in &s.uncommitted {
        let _ = writeln!(
            md,
            "- `{}` ({}, +{}/-{})",
            c.path,
            c.kind.as_str(),
            c.lines_added,
            c.lines_removed
        );
    }

    let _ = writeln!(md, "\n## Open blockers\n");
    if s.blockers.is_empty() {
        let _ = writeln!(md, "_None_");
    }
    for b in &s.blockers {
        let _ = writeln!(md, "- {}: {}", b.id, b.description);
    }

    let _ = writeln!(md, "\n## Next actions\n");
    if s.next_actions.is_empty() {
        let _ = writeln!(md, "_None_");
    }
    for (i, a) in s.next_actions.iter().enumerate() {
        let _ = writeln!(md, "{}. {}", i + 1, a);
    }

    let _ = writeln!(md, "\n## Recent decisions\n");
    if s.decisions.is_empty() {
        let _ = writeln!(md, "_None_");
    }
    for d in &s.decisions {
        let _ = writeln!(md, "- {}: {} (by {})", d.id, d.statement, d.made_by);
    }

    let _ = writeln!(md, "\n## Active claims\n");
    if s.active_claims.is_empty() {
        let _ = writeln!(md, "_None_");
    }
    for c in &s.active_claims {
        let _ = writeln!(md, "- `{}` held by {} ({})", c.path, c.holder, c.scope);
    }
    md
}

/// Captures, writes, recovers, and retires snapshots for one store.
pub struct SessionSnapshotter {
    store: Store,
    position: Box<dyn PositionSource>,
    vcs: Box<dyn VcsStatus>,
}

impl SessionSnapshotter {
    pub fn new(store: &Store, position: Box<dyn PositionSource>, vcs: Box<dyn VcsStatus>) -> Self {
        Self {
            store: store.clone(),
            position,
            vcs,
        }
    }

    /// Default sources: `<root>/state.json` and `git` in the project directory.
    pub fn for_store(store: &Store) -> Self {
        Self::new(
            store,
            Box::new(StateFile::new(store.state_path())),
            Box::new(GitCli::new(&store.project_root())),
        )
    }

    fn sessions_dir(&self) -> PathBuf {
        self.store.sessions_dir()
    }

    fn pointer_path(&self) -> PathBuf {
        self.sessions_dir().join(schemas::SESSION_LATEST_POINTER)
    }

    fn read_pointer(&self) -> Option<String> {
        let raw = fs::read_to_string(self.pointer_path()).ok()?;
        let id = raw.trim().to_string();
        validate_id(&id).ok().map(|_| id)
    }

    fn clear_pointer_if(&self, id: &str) -> Result<(), BlackboardError> {
        if self.read_pointer().as_deref() == Some(id) {
            remove_if_exists(&self.pointer_path())?;
            tracing::info!(id, "latest pointer cleared");
        }
        Ok(())
    }

    fn locate(&self, id: &str) -> Option<Located> {
        let live = Located {
            id: id.to_string(),
            dir: self.sessions_dir(),
            archived: false,
        };
        if live.file(schemas::SESSION_RECORD_EXT).is_file() {
            return Some(live);
        }
        let archived = Located {
            id: id.to_string(),
            dir: self.store.archive_dir(),
            archived: true,
        };
        archived
            .file(schemas::SESSION_RECORD_EXT)
            .is_file()
            .then_some(archived)
    }

    fn locate_or_not_found(&self, id: &str) -> Result<Located, BlackboardError> {
        validate_id(id)?;
        self.locate(id)
            .ok_or_else(|| BlackboardError::NotFound(format!("snapshot '{}' not found", id)))
    }

    fn phase_of(&self, loc: &Located) -> SnapshotPhase {
        if loc.archived {
            SnapshotPhase::Archived
        } else if loc.file(schemas::SESSION_STALE_MARKER_EXT).exists() {
            SnapshotPhase::Stale
        } else {
            SnapshotPhase::Written
        }
    }

    /// Every snapshot on disk, live and archived, oldest id first.
    fn scan(&self) -> Vec<Located> {
        let mut found = Vec::new();
        for (dir, archived) in [(self.sessions_dir(), false), (self.store.archive_dir(), true)] {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            dir = %dir.display(),
                            error = %e,
                            "snapshot directory unreadable"
                        );
                    }
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(schemas::SESSION_RECORD_EXT) {
                    continue;
                }
                let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if validate_id(id).is_ok() {
                    found.push(Located {
                        id: id.to_string(),
                        dir: dir.clone(),
                        archived,
                    });
                }
            }
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    fn load(&self, loc: &Located) -> Option<SessionSnapshot> {
        let path = loc.file(schemas::SESSION_RECORD_EXT);
        match read_snapshot(&path) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "snapshot unreadable; skipping");
                None
            }
        }
    }

    /// Loaded snapshots, oldest first by capture time.
    fn load_all(&self) -> Vec<(Located, SessionSnapshot)> {
        let mut all: Vec<(Located, SessionSnapshot)> = self
            .scan()
            .into_iter()
            .filter_map(|loc| self.load(&loc).map(|s| (loc, s)))
            .collect();
        all.sort_by(|(_, a), (_, b)| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        all
    }

    /// The snapshot named by the pointer, else the newest one on disk.
    fn latest_with_source(&self) -> Option<(SessionSnapshot, RecoverySource)> {
        if let Some(id) = self.read_pointer() {
            match self.locate(&id).and_then(|loc| self.load(&loc)) {
                Some(s) => return Some((s, RecoverySource::Pointer)),
                None => tracing::warn!(
                    id = %id,
                    "latest pointer is dangling; using newest snapshot"
                ),
            }
        }
        self.load_all()
            .pop()
            .map(|(_, s)| (s, RecoverySource::Newest))
    }

    pub fn latest(&self) -> Option<SessionSnapshot> {
        self.latest_with_source().map(|(s, _)| s)
    }

    /// Read every source and assemble a snapshot without writing it.
    pub fn capture(&self, trigger: Trigger, now: u64) -> Result<SessionSnapshot, BlackboardError> {
        let state = self.position.read_state()?;
        let head_commit = self.vcs.head().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "head commit unavailable");
            None
        });
        let uncommitted = self.vcs.uncommitted().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "working tree status unavailable; recording no changes");
            Vec::new()
        });

        let events = EventLog::new(&self.store);
        let decisions =
            DecisionLedger::new(&self.store).recent(self.store.config.sessions.recent_decisions);
        let active_claims = ClaimStore::new(&self.store).live(now);
        let artifact_count = ArtifactRegistry::new(&self.store).list().len();
        let since_previous_secs = self
            .latest()
            .map(|prev| now.saturating_sub(prev.created_at));

        let mut snapshot = SessionSnapshot {
            id: format!("{}{}", SNAPSHOT_ID_PREFIX, time::ulid_at(now)),
            created_at: now,
            since_previous_secs,
            trigger,
            position: state.position,
            head_commit,
            uncommitted,
            decisions,
            blockers: state.blockers,
            next_actions: state.next_actions,
            last_event_id: events.latest_id(),
            active_claims,
            artifact_count,
            fingerprint: String::new(),
        };
        snapshot.fingerprint = fingerprint(&snapshot);
        Ok(snapshot)
    }

    /// Capture and write a snapshot. Periodic triggers skip the write when nothing
    /// capturable changed since the latest snapshot.
    pub fn snapshot(&self, trigger: Trigger, now: u64) -> Result<SnapshotOutcome, BlackboardError> {
        let _guard = SNAPSHOT_WRITE_LOCK
            .lock()
            .map_err(|_| BlackboardError::LockPoisoned("snapshot write lock".to_string()))?;
        let mut phase = SnapshotPhase::NotStarted.transition(SnapshotPhase::Capturing)?;

        let snapshot = self.capture(trigger, now)?;
        if trigger == Trigger::Periodic
            && let Some(latest) = self.latest()
            && latest.fingerprint == snapshot.fingerprint
        {
            tracing::debug!(latest = %latest.id, "periodic snapshot skipped; state unchanged");
            return Ok(SnapshotOutcome::Unchanged { latest: latest.id });
        }

        let loc = Located {
            id: snapshot.id.clone(),
            dir: self.sessions_dir(),
            archived: false,
        };
        fs::create_dir_all(&loc.dir)?;
        write_atomic(
            &loc.file(schemas::SESSION_RECORD_EXT),
            serde_json::to_string_pretty(&snapshot)?.as_bytes(),
        )?;
        write_atomic(
            &loc.file(schemas::SESSION_SUMMARY_EXT),
            render_summary(&snapshot).as_bytes(),
        )?;
        write_atomic(&self.pointer_path(), format!("{}\n", snapshot.id).as_bytes())?;
        phase = phase.transition(SnapshotPhase::Written)?;

        tracing::info!(
            id = %snapshot.id,
            trigger = snapshot.trigger.as_str(),
            uncommitted = snapshot.uncommitted.len(),
            phase = ?phase,
            "session snapshot written"
        );
        if let Err(e) = EventLog::new(&self.store).append(NewEvent::new(
            events::SESSION_SNAPSHOT,
            serde_json::json!({
                "id": snapshot.id,
                "trigger": snapshot.trigger,
                "fingerprint": snapshot.fingerprint,
            }),
            now,
        )) {
            tracing::warn!(id = %snapshot.id, error = %e, "snapshot event not recorded");
        }
        Ok(SnapshotOutcome::Written {
            snapshot: Box::new(snapshot),
        })
    }

    /// Load the latest snapshot and check it against the live working tree.
    pub fn recover(&self) -> Result<RecoveryReport, BlackboardError> {
        let (snapshot, source) = self
            .latest_with_source()
            .ok_or_else(|| {
                BlackboardError::NotFound("no session snapshots to recover".to_string())
            })?;
        let marked_stale = self
            .locate(&snapshot.id)
            .is_some_and(|loc| self.phase_of(&loc) == SnapshotPhase::Stale);

        let mut discrepancies = Vec::new();
        let current: Option<HashSet<String>> = match self.vcs.uncommitted() {
            Ok(changes) => Some(changes.into_iter().map(|c| c.path).collect()),
            Err(e) => {
                discrepancies.push(Discrepancy::VcsUnavailable {
                    check: "uncommitted".to_string(),
                    reason: e.to_string(),
                });
                None
            }
        };

        let workdir = self.vcs.workdir().to_path_buf();
        for change in &snapshot.uncommitted {
            let exists = workdir.join(&change.path).exists();
            let still_differs = current.as_ref().map(|set| set.contains(&change.path));
            let path = change.path.clone();
            if change.kind == ChangeKind::Deleted {
                if exists {
                    discrepancies.push(Discrepancy::UnexpectedlyPresent { path });
                } else if still_differs == Some(false) {
                    discrepancies.push(Discrepancy::NoLongerModified { path });
                }
            } else if !exists {
                discrepancies.push(Discrepancy::MissingFile { path });
            } else if still_differs == Some(false) {
                discrepancies.push(Discrepancy::NoLongerModified { path });
            }
        }

        if let Some(commit) = &snapshot.head_commit {
            match self.vcs.is_reachable(commit) {
                Ok(true) => {}
                Ok(false) => discrepancies.push(Discrepancy::UnreachableCommit {
                    commit: commit.clone(),
                }),
                Err(e) => discrepancies.push(Discrepancy::VcsUnavailable {
                    check: "reachability".to_string(),
                    reason: e.to_string(),
                }),
            }
        }
        match self.vcs.head() {
            Ok(head) if head != snapshot.head_commit => discrepancies.push(Discrepancy::HeadMoved {
                recorded: snapshot.head_commit.clone(),
                current: head,
            }),
            Ok(_) => {}
            Err(e) => discrepancies.push(Discrepancy::VcsUnavailable {
                check: "head".to_string(),
                reason: e.to_string(),
            }),
        }

        if discrepancies.is_empty() {
            tracing::info!(id = %snapshot.id, "snapshot consistent with working tree");
        } else {
            tracing::warn!(
                id = %snapshot.id,
                count = discrepancies.len(),
                "snapshot diverges from working tree"
            );
        }
        Ok(RecoveryReport {
            snapshot,
            source,
            marked_stale,
            discrepancies,
        })
    }

    /// Newest first.
    pub fn list(&self) -> Vec<SnapshotListing> {
        let latest = self.latest().map(|s| s.id);
        let mut out: Vec<SnapshotListing> = self
            .load_all()
            .into_iter()
            .map(|(loc, s)| {
                let status = if latest.as_deref() == Some(s.id.as_str()) {
                    SnapshotStatus::Latest
                } else {
                    match self.phase_of(&loc) {
                        SnapshotPhase::Archived => SnapshotStatus::Archived,
                        SnapshotPhase::Stale => SnapshotStatus::Stale,
                        _ => SnapshotStatus::Written,
                    }
                };
                SnapshotListing {
                    date: time::format_utc(s.created_at),
                    position: s.position.summary(),
                    duration: s
                        .since_previous_secs
                        .map(time::format_duration)
                        .unwrap_or_else(|| "-".to_string()),
                    since_previous_secs: s.since_previous_secs,
                    created_at: s.created_at,
                    id: s.id,
                    status,
                }
            })
            .collect();
        out.reverse();
        out
    }

    pub fn show(&self, id: &str) -> Result<SessionSnapshot, BlackboardError> {
        let loc = self.locate_or_not_found(id)?;
        read_snapshot(&loc.file(schemas::SESSION_RECORD_EXT))
    }

    /// Delete one snapshot, clearing the latest pointer when it named it.
    pub fn delete(&self, id: &str) -> Result<(), BlackboardError> {
        let loc = self.locate_or_not_found(id)?;
        self.phase_of(&loc).transition(SnapshotPhase::Deleted)?;
        self.remove_files(&loc)?;
        self.clear_pointer_if(id)?;
        tracing::info!(id, "snapshot deleted");
        Ok(())
    }

    /// Record the operator's decision to treat a snapshot as stale.
    pub fn mark_stale(&self, id: &str) -> Result<(), BlackboardError> {
        let loc = self.locate_or_not_found(id)?;
        let phase = self.phase_of(&loc);
        if phase == SnapshotPhase::Stale {
            return Ok(());
        }
        phase.transition(SnapshotPhase::Stale)?;
        write_atomic(&loc.file(schemas::SESSION_STALE_MARKER_EXT), b"stale\n")?;
        tracing::info!(id, "snapshot marked stale");
        Ok(())
    }

    fn remove_files(&self, loc: &Located) -> Result<(), BlackboardError> {
        for ext in [
            schemas::SESSION_RECORD_EXT,
            schemas::SESSION_SUMMARY_EXT,
            schemas::SESSION_STALE_MARKER_EXT,
        ] {
            remove_if_exists(&loc.file(ext))?;
        }
        Ok(())
    }

    fn move_to_archive(&self, loc: &Located) -> Result<(), BlackboardError> {
        self.phase_of(loc).transition(SnapshotPhase::Archived)?;
        let archive = self.store.archive_dir();
        fs::create_dir_all(&archive)?;
        for ext in [
            schemas::SESSION_RECORD_EXT,
            schemas::SESSION_SUMMARY_EXT,
            schemas::SESSION_STALE_MARKER_EXT,
        ] {
            let from = loc.file(ext);
            if from.exists() {
                fs::rename(&from, archive.join(format!("{}.{}", loc.id, ext)))?;
            }
        }
        Ok(())
    }

    /// Move live snapshots older than `days` into the archive. Returns the moved ids.
    pub fn archive_older_than(&self, days: u64, now: u64) -> Result<Vec<String>, BlackboardError> {
        let cutoff = days.saturating_mul(SECS_PER_DAY);
        let mut moved = Vec::new();
        for (loc, s) in self.load_all() {
            if loc.archived || now.saturating_sub(s.created_at) <= cutoff {
                continue;
            }
            self.move_to_archive(&loc)?;
            moved.push(loc.id);
        }
        Ok(moved)
    }

    /// Apply the retention policy. Failures are logged per snapshot and never returned.
    pub fn clean(&self, now: u64) -> RetentionReport {
        let cfg = &self.store.config.sessions;
        let archive_after = cfg.archive_after_days.saturating_mul(SECS_PER_DAY);
        let delete_after = cfg.delete_after_days.saturating_mul(SECS_PER_DAY);

        // Live sources, read once. `None` means unreadable.
        let open_blockers: Option<HashSet<String>> = match self.position.read_state_strict() {
            Ok(doc) => Some(doc.blockers.into_iter().map(|b| b.id).collect()),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "position source unreadable; keeping snapshots with blockers"
                );
                None
            }
        };
        let dirty: Option<HashSet<String>> = match self.vcs.uncommitted() {
            Ok(changes) => Some(changes.into_iter().map(|c| c.path).collect()),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "working tree unreadable; keeping snapshots with changes"
                );
                None
            }
        };

        let mut report = RetentionReport::default();
        for (loc, s) in self.load_all() {
            let age = now.saturating_sub(s.created_at);
            if age > delete_after {
                let blocked = !s.blockers.is_empty()
                    && open_blockers
                        .as_ref()
                        .is_none_or(|open| s.blockers.iter().any(|b| open.contains(&b.id)));
                let unfinished = !s.uncommitted.is_empty()
                    && dirty
                        .as_ref()
                        .is_none_or(|set| s.uncommitted.iter().any(|c| set.contains(&c.path)));
                if !blocked && !unfinished {
                    match self.remove_files(&loc).and_then(|_| self.clear_pointer_if(&loc.id)) {
                        Ok(()) => report.deleted.push(loc.id),
                        Err(e) => {
                            tracing::warn!(id = %loc.id, error = %e, "snapshot deletion failed")
                        }
                    }
                    continue;
                }
                report.retained.push(loc.id.clone());
            }
            if age > archive_after && !loc.archived {
                match self.move_to_archive(&loc) {
                    Ok(()) => report.archived.push(loc.id),
                    Err(e) => tracing::warn!(id = %loc.id, error = %e, "snapshot archiving failed"),
                }
            }
        }
        tracing::info!(
            archived = report.archived.len(),
            deleted = report.deleted.len(),
            retained = report.retained.len(),
            "session retention applied"
        );
        report
    }

    /// Take periodic snapshots until `handle` returns false.
    pub fn run_periodic<F>(&self, interval: Duration, mut handle: F)
    where
        F: FnMut(&Result<SnapshotOutcome, BlackboardError>) -> bool,
    {
        loop {
            let result = self.snapshot(Trigger::Periodic, time::now_epoch_secs());
            if let Err(e) = &result {
                tracing::warn!(error = %e, "periodic snapshot failed");
            }
            if !handle(&result) {
                break;
            }
            thread::sleep(interval);
        }
    }
}

#[derive(Parser, Debug)]
pub struct SessionCli {
    #[clap(subcommand)]
    pub command: SessionCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Capture and write a snapshot now.
    Save {
        #[clap(long, value_enum, default_value = "explicit")]
        trigger: Trigger,
    },
    /// List snapshots, newest first.
    List {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Show one snapshot.
    Show {
        id: String,
        /// Print the Markdown summary instead of JSON.
        #[clap(long)]
        markdown: bool,
    },
    /// Delete one snapshot.
    Delete { id: String },
    /// Archive snapshots older than N days (defaults to the configured archive age).
    Archive {
        #[clap(long)]
        days: Option<u64>,
    },
    /// Apply the retention policy.
    Clean,
    /// Validate the latest snapshot against the working tree.
    Recover,
    /// Mark a snapshot as stale.
    Stale { id: String },
    /// Take periodic snapshots at the configured interval.
    Watch {
        /// Take a single periodic snapshot and exit.
        #[clap(long)]
        once: bool,
    },
}

fn print_listing(rows: &[SnapshotListing]) {
    use colored::Colorize;
    if rows.is_empty() {
        println!("{}", "No session snapshots.".bright_black());
        return;
    }
    println!(
        "{}",
        format!(
            "{:<16}  {:<28}  {:<9}  {:<8}  {}",
            "DATE", "ID", "STATUS", "SINCE", "POSITION"
        )
        .bold()
    );
    for row in rows {
        let status = match row.status {
            SnapshotStatus::Latest => row.status.as_str().bright_green().bold(),
            SnapshotStatus::Written => row.status.as_str().normal(),
            SnapshotStatus::Stale => row.status.as_str().yellow(),
            SnapshotStatus::Archived => row.status.as_str().bright_black(),
        };
        println!(
            "{:<16}  {:<28}  {:<9}  {:<8}  {}",
            row.date,
            row.id.bright_white(),
            status,
            row.duration,
            output::compact_line(&row.position, 60)
        );
    }
}

pub fn run_session_cli(store: &Store, cli: SessionCli) -> Result<(), BlackboardError> {
    let snapshotter = SessionSnapshotter::for_store(store);
    let now = time::now_epoch_secs();
    match cli.command {
        SessionCommand::Save { trigger } => {
            let outcome = snapshotter.snapshot(trigger, now)?;
            println!("{}", output::to_pretty_json(&outcome));
        }
        SessionCommand::List { format } => {
            let rows = snapshotter.list();
            if format == "json" {
                println!("{}", output::to_pretty_json(&rows));
            } else {
                print_listing(&rows);
            }
        }
        SessionCommand::Show { id, markdown } => {
            let snapshot = snapshotter.show(&id)?;
            if markdown {
                print!("{}", render_summary(&snapshot));
            } else {
                println!("{}", output::to_pretty_json(&snapshot));
            }
        }
        SessionCommand::Delete { id } => {
            snapshotter.delete(&id)?;
            println!(
                "{}",
                output::to_pretty_json(&serde_json::json!({ "id": id, "deleted": true }))
            );
        }
        SessionCommand::Archive { days } => {
            let days = days.unwrap_or(store.config.sessions.archive_after_days);
            let moved = snapshotter.archive_older_than(days, now)?;
            println!(
                "{}",
                output::to_pretty_json(&serde_json::json!({ "archived": moved }))
            );
        }
        SessionCommand::Clean => {
            println!("{}", output::to_pretty_json(&snapshotter.clean(now)));
        }
        SessionCommand::Recover => {
            println!("{}", output::to_pretty_json(&snapshotter.recover()?));
        }
        SessionCommand::Stale { id } => {
            snapshotter.mark_stale(&id)?;
            println!(
                "{}",
                output::to_pretty_json(&serde_json::json!({ "id": id, "stale": true }))
            );
        }
        SessionCommand::Watch { once } => {
            let interval = Duration::from_secs(store.config.sessions.interval_secs);
            snapshotter.run_periodic(interval, |result| {
                if let Ok(outcome) = result {
                    println!("{}", output::to_pretty_json(outcome));
                }
                !once
            });
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "session",
        "version": "0.1.0",
        "description": "Recoverable session snapshots with retention",
        "commands": [
            { "name": "save", "description": "Capture and write a snapshot", "parameters": ["trigger"] },
            { "name": "list", "description": "List snapshots with date, position, status, duration" },
            { "name": "show", "description": "Show one snapshot", "parameters": ["id"] },
            { "name": "delete", "description": "Delete one snapshot", "parameters": ["id"] },
            { "name": "archive", "description": "Archive snapshots older than N days", "parameters": ["days"] },
            { "name": "clean", "description": "Apply the archive/delete retention policy" },
            { "name": "recover", "description": "Validate the latest snapshot against the working tree" },
            { "name": "stale", "description": "Mark a snapshot as stale", "parameters": ["id"] },
            { "name": "watch", "description": "Take periodic snapshots", "parameters": ["once"] }
        ],
        "storage": [schemas::SESSIONS_DIR_NAME]
    })
}
