use blackboard::core::error::BlackboardError;
use blackboard::core::schemas;
use blackboard::core::store::Store;
use blackboard::plugins::claims::{AcquireOutcome, ClaimStore};
use blackboard::plugins::events::{self, EventLog};
use std::fs;
use std::thread;
use tempfile::tempdir;

const T: u64 = 1_760_000_000;
const MIN: u64 = 60;

fn open(root: &std::path::Path) -> (Store, ClaimStore, EventLog) {
    let store = Store::open(root).unwrap();
    (store.clone(), ClaimStore::new(&store), EventLog::new(&store))
}

#[test]
fn conflict_then_override_after_staleness() {
    let tmp = tempdir().unwrap();
    let (_store, claims, log) = open(tmp.path());

    let a = claims.acquire("src/api/users.ts", "agent-a", "02/03/1", T).unwrap();
    assert!(a.is_acquired());

    let b = claims
        .acquire("src/api/users.ts", "agent-b", "02/03/2", T + 5 * MIN)
        .unwrap();
    assert_eq!(
        b,
        AcquireOutcome::Conflict {
            holder: "agent-a".to_string(),
            scope: "02/03/1".to_string(),
            age_secs: 5 * MIN,
        }
    );
    let before_retry = log.latest_id();

    let b2 = claims
        .acquire("src/api/users.ts", "agent-b", "02/03/2", T + 31 * MIN)
        .unwrap();
    match &b2 {
        AcquireOutcome::Acquired { claim, superseded } => {
            assert_eq!(claim.holder, "agent-b");
            assert_eq!(superseded.as_ref().map(|c| c.holder.as_str()), Some("agent-a"));
        }
        other => panic!("expected acquisition, got {:?}", other),
    }

    let after: Vec<_> = log.since(before_retry).collect();
    let kinds: Vec<&str> = after.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, vec![events::CLAIM_SUPERSEDED, events::CLAIM_ACQUIRED]);
    assert_eq!(after[0].payload["previous_holder"], "agent-a");
    assert_eq!(after[1].payload["holder"], "agent-b");
}

#[test]
fn claim_is_exclusive_until_threshold() {
    let tmp = tempdir().unwrap();
    let (_store, claims, _log) = open(tmp.path());
    let threshold = claims.stale_after();

    assert!(claims.acquire("a.rs", "A", "s", T).unwrap().is_acquired());
    for dt in [0, 1, threshold / 2, threshold - 1] {
        let out = claims.acquire("a.rs", "B", "s", T + dt).unwrap();
        assert!(!out.is_acquired(), "B must conflict at +{}s", dt);
    }
    assert!(claims.acquire("a.rs", "B", "s", T + threshold).unwrap().is_acquired());
    assert_eq!(claims.get("a.rs", T + threshold).unwrap().holder, "B");
}

#[test]
fn same_holder_reacquire_refreshes() {
    let tmp = tempdir().unwrap();
    let (_store, claims, _log) = open(tmp.path());
    claims.acquire("a.rs", "A", "s", T).unwrap();
    let again = claims.acquire("a.rs", "A", "s", T + 10 * MIN).unwrap();
    assert!(again.is_acquired());
    assert_eq!(claims.get("a.rs", T + 10 * MIN).unwrap().acquired_at, T + 10 * MIN);
    // Refreshed, so B still conflicts past the original expiry.
    assert!(!claims.acquire("a.rs", "B", "s", T + 35 * MIN).unwrap().is_acquired());
}

#[test]
fn release_is_idempotent_and_holder_checked() {
    let tmp = tempdir().unwrap();
    let (_store, claims, log) = open(tmp.path());

    assert!(!claims.release("nothing.rs", "A", T).unwrap());
    claims.acquire("a.rs", "A", "s", T).unwrap();

    assert!(!claims.release("a.rs", "B", T + 1).unwrap());
    assert_eq!(claims.get("a.rs", T + 1).unwrap().holder, "A");

    let mark = log.latest_id();
    assert!(claims.release("a.rs", "A", T + 2).unwrap());
    assert!(!claims.release("a.rs", "A", T + 3).unwrap());
    assert!(claims.get("a.rs", T + 3).is_none());

    let released: Vec<_> = log.since(mark).collect();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].kind, events::CLAIM_RELEASED);
}

#[test]
fn unrecorded_acquire_is_rolled_back() {
    let tmp = tempdir().unwrap();
    let (store, claims, log) = open(tmp.path());
    let events_db = store.root.join(schemas::EVENTS_DB_NAME);
    fs::create_dir(&events_db).unwrap();

    let err = claims.acquire("a.rs", "A", "s", T).unwrap_err();
    assert!(matches!(err, BlackboardError::RusqliteError(_)), "{:?}", err);
    assert!(claims.get("a.rs", T).is_none());

    fs::remove_dir(&events_db).unwrap();
    match claims.acquire("a.rs", "B", "s", T + 1).unwrap() {
        AcquireOutcome::Acquired { claim, superseded } => {
            assert_eq!(claim.holder, "B");
            assert!(superseded.is_none());
        }
        other => panic!("expected acquisition, got {:?}", other),
    }
    let kinds: Vec<String> = log.since(0).map(|e| e.kind).collect();
    assert_eq!(kinds, vec![events::CLAIM_ACQUIRED.to_string()]);
}

#[test]
fn unrecorded_release_keeps_the_claim() {
    let tmp = tempdir().unwrap();
    let (store, claims, log) = open(tmp.path());
    claims.acquire("a.rs", "A", "s", T).unwrap();

    let events_db = store.root.join(schemas::EVENTS_DB_NAME);
    fs::remove_file(&events_db).unwrap();
    for suffix in ["-wal", "-shm"] {
        let _ = fs::remove_file(format!("{}{}", events_db.display(), suffix));
    }
    fs::create_dir(&events_db).unwrap();

    assert!(claims.release("a.rs", "A", T + 1).is_err());
    assert_eq!(claims.get("a.rs", T + 1).unwrap().holder, "A");

    fs::remove_dir(&events_db).unwrap();
    assert!(claims.release("a.rs", "A", T + 2).unwrap());
    let kinds: Vec<String> = log.since(0).map(|e| e.kind).collect();
    assert_eq!(kinds, vec![events::CLAIM_RELEASED.to_string()]);
}

#[test]
fn list_reports_age_and_staleness() {
    let tmp = tempdir().unwrap();
    let (_store, claims, _log) = open(tmp.path());
    claims.acquire("b.rs", "A", "s", T).unwrap();
    claims.acquire("a.rs", "B", "s", T + 40 * MIN).unwrap();

    let views = claims.list(T + 45 * MIN);
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].claim.path, "a.rs");
    assert!(!views[0].stale);
    assert_eq!(views[0].age_secs, 5 * MIN);
    assert_eq!(views[1].claim.path, "b.rs");
    assert!(views[1].stale);

    let live = claims.live(T + 45 * MIN);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].path, "a.rs");
}

#[test]
fn missing_fields_are_rejected() {
    let tmp = tempdir().unwrap();
    let (_store, claims, _log) = open(tmp.path());
    assert!(claims.acquire("", "A", "s", T).is_err());
    assert!(claims.acquire("a.rs", " ", "s", T).is_err());
}

#[test]
fn concurrent_acquires_leave_one_winner() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    Store::open(&root).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let root = root.clone();
            thread::spawn(move || {
                let store = Store::open(&root).unwrap();
                ClaimStore::new(&store)
                    .acquire("shared.rs", &format!("agent-{}", i), "s", T)
                    .unwrap()
            })
        })
        .collect();
    let outcomes: Vec<AcquireOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = outcomes.iter().filter(|o| o.is_acquired()).count();
    assert_eq!(winners, 1);
    let store = Store::open(&root).unwrap();
    assert_eq!(ClaimStore::new(&store).list(T).len(), 1);
}
