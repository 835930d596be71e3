use blackboard::core::error::BlackboardError;
use blackboard::core::position::{Blocker, Position, PositionSource, StateDocument, StateFile};
use blackboard::core::store::Store;
use blackboard::core::time::SECS_PER_DAY;
use blackboard::core::vcs::{ChangeKind, UncommittedChange, VcsStatus};
use blackboard::plugins::claims::ClaimStore;
use blackboard::plugins::decisions::{DecisionLedger, NewDecision};
use blackboard::plugins::events::{self, EventLog};
use blackboard::plugins::hooks;
use blackboard::plugins::session::{
    Discrepancy, RecoverySource, SessionSnapshot, SessionSnapshotter, SnapshotOutcome,
    SnapshotStatus, Trigger,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const T: u64 = 1_760_000_000;
const HEAD: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

struct FakeState(StateDocument);

impl PositionSource for FakeState {
    fn read_state(&self) -> Result<StateDocument, BlackboardError> {
        Ok(self.0.clone())
    }
}

struct BrokenState;

impl PositionSource for BrokenState {
    fn read_state(&self) -> Result<StateDocument, BlackboardError> {
        Err(BlackboardError::ValidationError("state unavailable".to_string()))
    }
}

#[derive(Clone)]
struct FakeVcs {
    workdir: PathBuf,
    head: Option<String>,
    changes: Vec<UncommittedChange>,
    reachable: bool,
    broken: bool,
}

impl FakeVcs {
    fn clean(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            head: Some(HEAD.to_string()),
            changes: Vec::new(),
            reachable: true,
            broken: false,
        }
    }

    fn with_change(mut self, path: &str, kind: ChangeKind) -> Self {
        self.changes.push(UncommittedChange {
            path: path.to_string(),
            kind,
            lines_added: 3,
            lines_removed: 1,
        });
        self
    }
}

impl VcsStatus for FakeVcs {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn head(&self) -> Result<Option<String>, BlackboardError> {
        if self.broken {
            return Err(BlackboardError::VcsError("git unavailable".to_string()));
        }
        Ok(self.head.clone())
    }

    fn uncommitted(&self) -> Result<Vec<UncommittedChange>, BlackboardError> {
        if self.broken {
            return Err(BlackboardError::VcsError("git unavailable".to_string()));
        }
        Ok(self.changes.clone())
    }

    fn is_reachable(&self, _commit: &str) -> Result<bool, BlackboardError> {
        if self.broken {
            return Err(BlackboardError::VcsError("git unavailable".to_string()));
        }
        Ok(self.reachable)
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    store: Store,
    work: PathBuf,
}

fn fixture() -> Fixture {
    let tmp = tempdir().unwrap();
    let store = Store::open(&tmp.path().join(".blackboard")).unwrap();
    let work = tmp.path().join("work");
    fs::create_dir_all(work.join("src")).unwrap();
    Fixture {
        _tmp: tmp,
        store,
        work,
    }
}

fn in_progress() -> StateDocument {
    StateDocument {
        position: Position {
            phase: Some("02".to_string()),
            plan: Some("03".to_string()),
            task: Some(2),
            status: "in_progress".to_string(),
            ..Default::default()
        },
        blockers: Vec::new(),
        next_actions: vec!["finish users endpoint".to_string()],
    }
}

fn with_blocker(mut doc: StateDocument, id: &str) -> StateDocument {
    doc.blockers.push(Blocker {
        id: id.to_string(),
        description: "waiting on schema review".to_string(),
        since: None,
    });
    doc
}

fn snapshotter(store: &Store, state: StateDocument, vcs: FakeVcs) -> SessionSnapshotter {
    SessionSnapshotter::new(store, Box::new(FakeState(state)), Box::new(vcs))
}

fn written(outcome: SnapshotOutcome) -> SessionSnapshot {
    match outcome {
        SnapshotOutcome::Written { snapshot } => *snapshot,
        other => panic!("expected a written snapshot, got {:?}", other),
    }
}

#[test]
fn snapshot_round_trip() {
    let fx = fixture();
    fs::write(fx.work.join("src/users.ts"), "export {}\n").unwrap();
    fs::write(fx.work.join("src/user.ts"), "export {}\n").unwrap();
    let vcs = FakeVcs::clean(&fx.work)
        .with_change("src/user.ts", ChangeKind::Modified)
        .with_change("src/users.ts", ChangeKind::Untracked);

    let snap = snapshotter(&fx.store, in_progress(), vcs.clone());
    let taken = written(snap.snapshot(Trigger::Explicit, T).unwrap());
    assert!(taken.id.starts_with("S_"));
    assert_eq!(taken.since_previous_secs, None);

    let sessions = fx.store.sessions_dir();
    assert!(sessions.join(format!("{}.json", taken.id)).is_file());
    let summary = fs::read_to_string(sessions.join(format!("{}.md", taken.id))).unwrap();
    assert!(summary.contains("phase 02 / plan 03 / task 2 [in_progress]"));
    assert!(summary.contains("`src/user.ts` (modified, +3/-1)"));
    assert_eq!(
        fs::read_to_string(sessions.join("LATEST")).unwrap().trim(),
        taken.id
    );

    let report = snapshotter(&fx.store, in_progress(), vcs).recover().unwrap();
    assert!(report.is_consistent(), "{:?}", report.discrepancies);
    assert_eq!(report.source, RecoverySource::Pointer);
    assert_eq!(report.snapshot.position, in_progress().position);
    assert_eq!(
        report.snapshot.uncommitted_paths(),
        vec!["src/user.ts", "src/users.ts"]
    );
    assert_eq!(report.snapshot, taken);
}

#[test]
fn recovery_reports_every_divergence() {
    let fx = fixture();
    fs::write(fx.work.join("src/kept.ts"), "x\n").unwrap();
    fs::write(fx.work.join("src/gone.ts"), "x\n").unwrap();
    fs::write(fx.work.join("src/committed.ts"), "x\n").unwrap();
    let at_capture = FakeVcs::clean(&fx.work)
        .with_change("src/kept.ts", ChangeKind::Modified)
        .with_change("src/gone.ts", ChangeKind::Modified)
        .with_change("src/committed.ts", ChangeKind::Modified)
        .with_change("src/removed.ts", ChangeKind::Deleted);
    snapshotter(&fx.store, in_progress(), at_capture)
        .snapshot(Trigger::Explicit, T)
        .unwrap();

    // Later: one file vanished, one was committed, a deleted file came back, history rewritten.
    fs::remove_file(fx.work.join("src/gone.ts")).unwrap();
    fs::write(fx.work.join("src/removed.ts"), "back\n").unwrap();
    let mut now = FakeVcs::clean(&fx.work)
        .with_change("src/kept.ts", ChangeKind::Modified)
        .with_change("src/removed.ts", ChangeKind::Untracked);
    now.head = Some("ffffffffffffffffffffffffffffffffffffffff".to_string());
    now.reachable = false;

    let report = snapshotter(&fx.store, in_progress(), now).recover().unwrap();
    assert!(!report.is_consistent());
    let d = &report.discrepancies;
    assert!(d.contains(&Discrepancy::MissingFile {
        path: "src/gone.ts".to_string()
    }));
    assert!(d.contains(&Discrepancy::NoLongerModified {
        path: "src/committed.ts".to_string()
    }));
    assert!(d.contains(&Discrepancy::UnexpectedlyPresent {
        path: "src/removed.ts".to_string()
    }));
    assert!(d.contains(&Discrepancy::UnreachableCommit {
        commit: HEAD.to_string()
    }));
    assert!(d.iter().any(|x| matches!(x, Discrepancy::HeadMoved { .. })));
    assert!(
        !d.iter()
            .any(|x| matches!(x, Discrepancy::MissingFile { path } if path == "src/kept.ts"))
    );
    // The snapshot itself is still returned intact.
    assert_eq!(report.snapshot.uncommitted.len(), 4);
}

#[test]
fn recovery_never_silently_accepts_when_vcs_is_down() {
    let fx = fixture();
    snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work))
        .snapshot(Trigger::Explicit, T)
        .unwrap();
    let mut down = FakeVcs::clean(&fx.work);
    down.broken = true;
    let report = snapshotter(&fx.store, in_progress(), down).recover().unwrap();
    assert!(
        report
            .discrepancies
            .iter()
            .any(|d| matches!(d, Discrepancy::VcsUnavailable { .. }))
    );
}

#[test]
fn recover_without_snapshots_is_not_found() {
    let fx = fixture();
    let err = snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work))
        .recover()
        .unwrap_err();
    assert!(matches!(err, BlackboardError::NotFound(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn periodic_trigger_skips_unchanged_state() {
    let fx = fixture();
    let snap = snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work));
    let first = written(snap.snapshot(Trigger::Periodic, T).unwrap());

    match snap.snapshot(Trigger::Periodic, T + 600).unwrap() {
        SnapshotOutcome::Unchanged { latest } => assert_eq!(latest, first.id),
        other => panic!("expected unchanged, got {:?}", other),
    }
    // Explicit requests always write.
    written(snap.snapshot(Trigger::Explicit, T + 601).unwrap());

    // A new claim changes the capturable state.
    ClaimStore::new(&fx.store)
        .acquire("src/api/users.ts", "agent-a", "02/03/2", T + 700)
        .unwrap();
    let changed = written(snap.snapshot(Trigger::Periodic, T + 1200).unwrap());
    assert_eq!(changed.active_claims.len(), 1);
    assert_eq!(changed.since_previous_secs, Some(599));
    assert_eq!(snap.list().len(), 3);
}

#[test]
fn snapshot_aggregates_blackboard_state() {
    let fx = fixture();
    let ledger = DecisionLedger::new(&fx.store);
    for i in 0..7 {
        ledger
            .record(
                &NewDecision {
                    statement: format!("decision {}", i),
                    rationale: "r".to_string(),
                    made_by: "02/03".to_string(),
                    affects: vec!["02".to_string()],
                },
                T + i,
            )
            .unwrap();
    }
    let snap = snapshotter(
        &fx.store,
        with_blocker(in_progress(), "B1"),
        FakeVcs::clean(&fx.work),
    );
    let taken = written(snap.snapshot(Trigger::Checkpoint, T + 100).unwrap());

    let statements: Vec<&str> = taken.decisions.iter().map(|d| d.statement.as_str()).collect();
    assert_eq!(
        statements,
        vec!["decision 2", "decision 3", "decision 4", "decision 5", "decision 6"]
    );
    assert_eq!(taken.blockers.len(), 1);
    assert_eq!(taken.next_actions, vec!["finish users endpoint".to_string()]);
    assert_eq!(taken.head_commit.as_deref(), Some(HEAD));
    assert_eq!(taken.trigger, Trigger::Checkpoint);

    let log = EventLog::new(&fx.store);
    let last = log.tail(1);
    assert_eq!(last[0].kind, events::SESSION_SNAPSHOT);
    assert_eq!(last[0].payload["id"], taken.id.as_str());
    assert!(taken.last_event_id < last[0].id);
}

#[test]
fn listing_show_stale_and_delete() {
    let fx = fixture();
    let snap = snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work));
    let older = written(snap.snapshot(Trigger::Explicit, T).unwrap());
    let newer = written(snap.snapshot(Trigger::Explicit, T + 600).unwrap());

    let rows = snap.list();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, newer.id);
    assert_eq!(rows[0].status, SnapshotStatus::Latest);
    assert_eq!(rows[0].duration, "10m");
    assert_eq!(rows[0].position, "phase 02 / plan 03 / task 2 [in_progress]");
    assert_eq!(rows[1].status, SnapshotStatus::Written);
    assert_eq!(rows[1].duration, "-");

    snap.mark_stale(&older.id).unwrap();
    assert_eq!(snap.list()[1].status, SnapshotStatus::Stale);
    assert_eq!(snap.show(&older.id).unwrap(), older);

    snap.delete(&newer.id).unwrap();
    assert!(!fx.store.sessions_dir().join("LATEST").exists());
    assert!(matches!(snap.show(&newer.id), Err(BlackboardError::NotFound(_))));

    // With the pointer gone, recovery falls back to the newest remaining snapshot.
    let report = snap.recover().unwrap();
    assert_eq!(report.source, RecoverySource::Newest);
    assert_eq!(report.snapshot.id, older.id);
    assert!(report.marked_stale);
}

#[test]
fn administrative_errors_are_explicit() {
    let fx = fixture();
    let snap = snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work));
    let missing = "S_01J9ZC1Q8V5YQ3W6C8K2H4N7TB";
    assert!(matches!(snap.delete(missing), Err(BlackboardError::NotFound(_))));
    assert!(matches!(snap.mark_stale(missing), Err(BlackboardError::NotFound(_))));
    assert!(matches!(
        snap.show("../../etc/passwd"),
        Err(BlackboardError::ValidationError(_))
    ));
}

#[test]
fn retention_deletes_unblocked_and_keeps_blocked() {
    let fx = fixture();
    let old = T - 35 * SECS_PER_DAY;
    let plain = written(
        snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work))
            .snapshot(Trigger::Explicit, old)
            .unwrap(),
    );
    let blocked = written(
        snapshotter(&fx.store, with_blocker(in_progress(), "B1"), FakeVcs::clean(&fx.work))
            .snapshot(Trigger::Explicit, old + 60)
            .unwrap(),
    );
    let week_old = written(
        snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work))
            .snapshot(Trigger::Explicit, T - 10 * SECS_PER_DAY)
            .unwrap(),
    );
    let fresh = written(
        snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work))
            .snapshot(Trigger::Explicit, T - SECS_PER_DAY)
            .unwrap(),
    );

    // B1 is still open in the live state document.
    let snap = snapshotter(&fx.store, with_blocker(in_progress(), "B1"), FakeVcs::clean(&fx.work));
    let report = snap.clean(T);
    assert_eq!(report.deleted, vec![plain.id.clone()]);
    assert_eq!(report.retained, vec![blocked.id.clone()]);
    assert_eq!(report.archived, vec![blocked.id.clone(), week_old.id.clone()]);

    assert!(matches!(snap.show(&plain.id), Err(BlackboardError::NotFound(_))));
    assert!(fx.store.archive_dir().join(format!("{}.json", blocked.id)).is_file());
    assert!(fx.store.sessions_dir().join(format!("{}.json", fresh.id)).is_file());

    // Once the blocker is resolved the snapshot goes too.
    let resolved = snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work)).clean(T);
    assert_eq!(resolved.deleted, vec![blocked.id]);
}

#[test]
fn retention_keeps_snapshots_with_outstanding_changes() {
    let fx = fixture();
    fs::write(fx.work.join("src/wip.ts"), "x\n").unwrap();
    let dirty = FakeVcs::clean(&fx.work).with_change("src/wip.ts", ChangeKind::Modified);
    let old = written(
        snapshotter(&fx.store, in_progress(), dirty.clone())
            .snapshot(Trigger::Explicit, T - 40 * SECS_PER_DAY)
            .unwrap(),
    );

    let still_dirty = snapshotter(&fx.store, in_progress(), dirty).clean(T);
    assert_eq!(still_dirty.retained, vec![old.id.clone()]);
    assert!(still_dirty.deleted.is_empty());

    // Live sources unreadable: keep.
    let mut down = FakeVcs::clean(&fx.work);
    down.broken = true;
    let unknown =
        SessionSnapshotter::new(&fx.store, Box::new(BrokenState), Box::new(down)).clean(T);
    assert_eq!(unknown.retained, vec![old.id.clone()]);

    let committed = snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work)).clean(T);
    assert_eq!(committed.deleted, vec![old.id]);
}

#[test]
fn retention_treats_unreadable_state_document_as_unknown() {
    let fx = fixture();
    let state_path = fx.store.state_path();
    let from_file = || {
        SessionSnapshotter::new(
            &fx.store,
            Box::new(StateFile::new(fx.store.state_path())),
            Box::new(FakeVcs::clean(&fx.work)),
        )
    };
    fs::write(
        &state_path,
        r#"{"position":{"phase":"02","status":"blocked"},"blockers":[{"id":"B1","description":"review"}]}"#,
    )
    .unwrap();
    let blocked = written(
        from_file()
            .snapshot(Trigger::Explicit, T - 35 * SECS_PER_DAY)
            .unwrap(),
    );
    assert_eq!(blocked.blockers.len(), 1);

    fs::write(&state_path, "{ truncated").unwrap();
    let corrupt = from_file().clean(T);
    assert!(corrupt.deleted.is_empty());
    assert_eq!(corrupt.retained, vec![blocked.id.clone()]);

    fs::remove_file(&state_path).unwrap();
    let missing = from_file().clean(T);
    assert_eq!(missing.retained, vec![blocked.id.clone()]);

    fs::write(&state_path, r#"{"blockers":[]}"#).unwrap();
    let resolved = from_file().clean(T);
    assert_eq!(resolved.deleted, vec![blocked.id]);
}

#[test]
fn bulk_archive_by_age() {
    let fx = fixture();
    let snap = snapshotter(&fx.store, in_progress(), FakeVcs::clean(&fx.work));
    let old = written(snap.snapshot(Trigger::Explicit, T - 3 * SECS_PER_DAY).unwrap());
    let new = written(snap.snapshot(Trigger::Explicit, T).unwrap());

    let moved = snap.archive_older_than(2, T).unwrap();
    assert_eq!(moved, vec![old.id.clone()]);
    let rows = snap.list();
    assert_eq!(rows[0].id, new.id);
    assert_eq!(rows[1].status, SnapshotStatus::Archived);
    // Archived snapshots cannot be marked stale.
    assert!(snap.mark_stale(&old.id).is_err());
    assert_eq!(snap.show(&old.id).unwrap().id, old.id);
}

#[test]
fn hooks_record_events_and_snapshot() {
    let fx = fixture();
    hooks::post_mutation(&fx.store, "src/api/users.ts", T);
    hooks::commit_observed(&fx.store, HEAD, T + 1);

    let kinds: Vec<String> = EventLog::new(&fx.store)
        .since(0)
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&events::RESOURCE_MUTATED.to_string()));
    assert!(kinds.contains(&events::COMMIT_OBSERVED.to_string()));
    let snapshots = SessionSnapshotter::for_store(&fx.store).list();
    assert!(!snapshots.is_empty());
    assert!(snapshots.iter().all(|s| s.status != SnapshotStatus::Archived));
}

#[test]
fn hooks_swallow_failures() {
    let fx = fixture();
    // Replace the store directory with a plain file so every write fails.
    fs::remove_dir_all(&fx.store.root).unwrap();
    fs::write(&fx.store.root, "not a directory").unwrap();
    hooks::post_mutation(&fx.store, "src/a.ts", T);
    hooks::commit_observed(&fx.store, HEAD, T);
    hooks::spawn_post_mutation(fx.store.root.clone(), "src/b.ts".to_string())
        .join()
        .unwrap();
    hooks::spawn_commit_observed(fx.store.root.clone(), HEAD.to_string())
        .join()
        .unwrap();
}
