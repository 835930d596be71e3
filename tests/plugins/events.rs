use blackboard::core::store::Store;
use blackboard::plugins::events::{EventLog, EventPoller, NewEvent, Poll};
use serde_json::json;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const T: u64 = 1_760_000_000;

fn append_n(log: &EventLog, n: usize) -> Vec<u64> {
    (0..n)
        .map(|i| {
            log.append(NewEvent::new("test:tick", json!({ "i": i }), T + i as u64))
                .unwrap()
                .id
        })
        .collect()
}

#[test]
fn ids_strictly_increase_without_gaps() {
    let tmp = tempdir().unwrap();
    let log = EventLog::with_capacity(tmp.path(), 100);
    let ids = append_n(&log, 25);
    assert_eq!(ids, (1..=25).collect::<Vec<u64>>());
    assert_eq!(log.latest_id(), 25);
    assert_eq!(log.oldest_id(), Some(1));
}

#[test]
fn log_is_bounded_and_drops_oldest_first() {
    let tmp = tempdir().unwrap();
    let log = EventLog::with_capacity(tmp.path(), 10);
    append_n(&log, 25);

    assert_eq!(log.len(), 10);
    assert_eq!(log.oldest_id(), Some(16));
    let retained: Vec<u64> = log.since(0).map(|e| e.id).collect();
    assert_eq!(retained, (16..=25).collect::<Vec<u64>>());

    // Trimming never reuses ids.
    let next = log.append(NewEvent::new("test:tick", json!({}), T)).unwrap();
    assert_eq!(next.id, 26);
}

#[test]
fn default_capacity_is_one_thousand() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let log = EventLog::new(&store);
    assert_eq!(log.capacity(), 1000);
    append_n(&log, 1005);
    assert_eq!(log.len(), 1000);
    assert_eq!(log.oldest_id(), Some(6));
    assert_eq!(log.tail(3).iter().map(|e| e.id).collect::<Vec<_>>(), vec![1003, 1004, 1005]);
}

#[test]
fn since_is_bounded_by_high_water_mark() {
    let tmp = tempdir().unwrap();
    let log = EventLog::with_capacity(tmp.path(), 1000);
    append_n(&log, 300);

    let mut cursor = log.since(250);
    assert_eq!(cursor.upper(), 300);
    let first = cursor.next().unwrap();
    assert_eq!(first.id, 251);

    // Appends after the cursor was created stay out of it.
    append_n(&log, 5);
    let rest: Vec<u64> = cursor.map(|e| e.id).collect();
    assert_eq!(rest.last(), Some(&300));
    assert_eq!(rest.len(), 49);

    // Paging crosses page boundaries without losing rows.
    let all: Vec<u64> = log.since(0).map(|e| e.id).collect();
    assert_eq!(all, (1..=305).collect::<Vec<u64>>());
}

#[test]
fn since_is_restartable() {
    let tmp = tempdir().unwrap();
    let log = EventLog::with_capacity(tmp.path(), 100);
    append_n(&log, 12);
    let a: Vec<_> = log.since(4).collect();
    let b: Vec<_> = log.since(4).collect();
    assert_eq!(a, b);
    assert!(log.since(12).next().is_none());
    assert!(log.since(99).next().is_none());
}

#[test]
fn gap_is_reported_when_consumer_fell_behind() {
    let tmp = tempdir().unwrap();
    let log = EventLog::with_capacity(tmp.path(), 5);
    append_n(&log, 12);

    let cursor = log.since(2);
    let gap = cursor.gap().unwrap();
    assert_eq!(gap.requested_after, 2);
    assert_eq!(gap.oldest_retained, 8);

    assert!(log.since(7).gap().is_none());
    assert!(log.since(0).gap().is_some());
}

#[test]
fn poller_reports_events_idle_and_resync() {
    let tmp = tempdir().unwrap();
    let log = EventLog::with_capacity(tmp.path(), 3);
    let mut poller = EventPoller::new(log.clone(), 0, Duration::from_millis(1));

    assert_eq!(poller.poll_once(), Poll::Idle);

    append_n(&log, 2);
    match poller.poll_once() {
        Poll::Events(events) => assert_eq!(events.len(), 2),
        other => panic!("expected events, got {:?}", other),
    }
    assert_eq!(poller.last_seen(), 2);
    assert_eq!(poller.poll_once(), Poll::Idle);

    append_n(&log, 6);
    match poller.poll_once() {
        Poll::Resync { gap, events } => {
            assert_eq!(gap.requested_after, 2);
            assert_eq!(gap.oldest_retained, 6);
            assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![6, 7, 8]);
        }
        other => panic!("expected resync, got {:?}", other),
    }
    assert_eq!(poller.last_seen(), 8);
}

#[test]
fn poller_run_stops_when_handler_declines() {
    let tmp = tempdir().unwrap();
    let log = EventLog::with_capacity(tmp.path(), 10);
    append_n(&log, 3);
    let mut poller = EventPoller::new(log, 0, Duration::from_millis(1));
    let mut polls = 0;
    poller.run(|_| {
        polls += 1;
        polls < 3
    });
    assert_eq!(polls, 3);
    assert_eq!(poller.last_seen(), 3);
}

#[test]
fn concurrent_appends_keep_ids_unique() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let root = root.clone();
            thread::spawn(move || {
                let log = EventLog::with_capacity(&root, 1000);
                append_n(&log, 25)
            })
        })
        .collect();
    let mut ids: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=100).collect::<Vec<u64>>());
}

#[test]
fn missing_or_malformed_log_reads_empty() {
    let tmp = tempdir().unwrap();
    let log = EventLog::with_capacity(tmp.path(), 10);
    assert!(log.is_empty());
    assert_eq!(log.latest_id(), 0);

    std::fs::write(tmp.path().join("events.db"), b"definitely not sqlite").unwrap();
    assert!(log.is_empty());
    assert!(log.since(0).next().is_none());

    // The next write quarantines the malformed file and starts fresh.
    let e = log.append(NewEvent::new("test:tick", json!({}), T)).unwrap();
    assert_eq!(e.id, 1);
    let quarantined = std::fs::read_dir(tmp.path())
        .unwrap()
        .flatten()
        .any(|entry| entry.file_name().to_string_lossy().starts_with("events.db.corrupt-"));
    assert!(quarantined);
}
