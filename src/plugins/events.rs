//! Coordination event log: bounded, append-only, monotonically identified.
//!
//! Ids come from a single counter persisted next to the events, so they keep increasing
//! across trims and restarts. The log retains the most recent `capacity` events; older ones
//! are dropped inside the same transaction that appended the new one.
//!
//! Consumption is cooperative polling. [`EventLog::since`] yields a finite, restartable
//! cursor; [`EventPoller`] wraps it with a fixed sleep between polls. There is no push
//! channel and no acknowledgement tracking.

use crate::core::broker::DbBroker;
use crate::core::db::DbSpec;
use crate::core::error::BlackboardError;
use crate::core::output;
use crate::core::schemas;
use crate::core::store::Store;
use clap::Parser;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

pub const EVENTS_DB: DbSpec = DbSpec {
    name: schemas::EVENTS_DB_NAME,
    schema: schemas::EVENTS_DB_SCHEMA,
};

// Event type tags.
pub const CLAIM_ACQUIRED: &str = "claim:acquired";
pub const CLAIM_RELEASED: &str = "claim:released";
pub const CLAIM_SUPERSEDED: &str = "claim:superseded";
pub const ARTIFACT_REGISTERED: &str = "artifact:registered";
pub const DEPENDENCY_SATISFIED: &str = "dependency:satisfied";
pub const DECISION_RECORDED: &str = "decision:recorded";
pub const SESSION_SNAPSHOT: &str = "session:snapshot";
pub const RESOURCE_MUTATED: &str = "hook:resource-mutated";
pub const COMMIT_OBSERVED: &str = "hook:commit-observed";

/// Rows fetched per page while iterating a cursor.
const PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub ts: u64,
}

/// An event before the log has assigned its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub kind: String,
    pub payload: serde_json::Value,
    pub ts: u64,
}

impl NewEvent {
    pub fn new(kind: &str, payload: serde_json::Value, ts: u64) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
            ts,
        }
    }
}

/// The requested position is older than anything still retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub requested_after: u64,
    pub oldest_retained: u64,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    root: PathBuf,
    capacity: usize,
}

impl EventLog {
    pub fn new(store: &Store) -> Self {
        Self::with_capacity(&store.root, store.config.events.capacity)
    }

    pub fn with_capacity(root: &Path, capacity: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn broker(&self) -> DbBroker {
        DbBroker::new(&self.root)
    }

    /// Assign the next id, store the event, and trim back to `capacity`.
    pub fn append(&self, event: NewEvent) -> Result<Event, BlackboardError> {
        let payload_json = serde_json::to_string(&event.payload)?;
        let capacity = self.capacity;
        self.broker()
            .with_write(&EVENTS_DB, "blackboard", "events.append", |tx| {
                let last: i64 = tx
                    .query_row(
                        "SELECT value FROM meta WHERE key = ?1",
                        params![schemas::EVENTS_META_LAST_ID],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or(0);
                let id = last + 1;

                tx.execute(
                    "INSERT INTO events(id, kind, payload, ts) VALUES(?1, ?2, ?3, ?4)",
                    params![id, event.kind, payload_json, event.ts as i64],
                )?;
                tx.execute(
                    "INSERT INTO meta(key, value) VALUES(?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![schemas::EVENTS_META_LAST_ID, id],
                )?;

                let count: i64 = tx.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
                let excess = count - capacity as i64;
                if excess > 0 {
                    tx.execute(
                        "DELETE FROM events WHERE id IN (SELECT id FROM events ORDER BY id ASC LIMIT ?1)",
                        params![excess],
                    )?;
                }

                Ok(Event {
                    id: id as u64,
                    kind: event.kind.clone(),
                    payload: event.payload.clone(),
                    ts: event.ts,
                })
            })
    }

    /// Highest id ever assigned (0 when nothing has been appended).
    pub fn latest_id(&self) -> u64 {
        self.broker()
            .read_or_default(&EVENTS_DB, "events.latest_id", |conn| {
                let last: Option<i64> = conn
                    .query_row(
                        "SELECT value FROM meta WHERE key = ?1",
                        params![schemas::EVENTS_META_LAST_ID],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(last.unwrap_or(0) as u64)
            })
    }

    /// Oldest id still retained.
    pub fn oldest_id(&self) -> Option<u64> {
        self.broker()
            .read_or_default(&EVENTS_DB, "events.oldest_id", |conn| {
                let oldest: Option<i64> =
                    conn.query_row("SELECT MIN(id) FROM events", [], |row| row.get(0))?;
                Ok(oldest.map(|v| v as u64))
            })
    }

    pub fn len(&self) -> usize {
        self.broker()
            .read_or_default(&EVENTS_DB, "events.len", |conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
                Ok(count as usize)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The last `n` retained events, ascending.
    pub fn tail(&self, n: usize) -> Vec<Event> {
        let after = self.latest_id().saturating_sub(n as u64);
        self.since(after).collect()
    }

    /// Events with id > `last_seen_id`, ascending, up to the high-water mark at call time.
    pub fn since(&self, last_seen_id: u64) -> EventCursor {
        let upper = self.latest_id();
        let gap = match self.oldest_id() {
            Some(oldest) if last_seen_id.saturating_add(1) < oldest => Some(Gap {
                requested_after: last_seen_id,
                oldest_retained: oldest,
            }),
            _ => None,
        };
        EventCursor {
            broker: self.broker(),
            after: last_seen_id,
            upper,
            buffer: VecDeque::new(),
            gap,
            done: last_seen_id >= upper,
        }
    }
}

/// Lazy, finite iterator over a range of the log. Pages are fetched on demand.
pub struct EventCursor {
    broker: DbBroker,
    after: u64,
    upper: u64,
    buffer: VecDeque<Event>,
    gap: Option<Gap>,
    done: bool,
}

impl EventCursor {
    /// Set when the requested range was (partly) trimmed away. The consumer should rebuild
    /// its view from current state instead of assuming continuity.
    pub fn gap(&self) -> Option<Gap> {
        self.gap
    }

    /// Upper id bound fixed when the cursor was created.
    pub fn upper(&self) -> u64 {
        self.upper
    }

    fn fetch_page(&mut self) {
        let after = self.after;
        let upper = self.upper;
        let page: Vec<Event> = self
            .broker
            .read_or_default(&EVENTS_DB, "events.since", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, payload, ts FROM events WHERE id > ?1 AND id <= ?2 ORDER BY id ASC LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    params![after as i64, upper as i64, PAGE_SIZE as i64],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )?;
                let mut out = Vec::new();
                for r in rows {
                    let (id, kind, payload, ts) = r?;
                    let payload = serde_json::from_str(&payload).unwrap_or_else(|e| {
                        tracing::warn!(id, error = %e, "event payload malformed; yielding null");
                        serde_json::Value::Null
                    });
                    out.push(Event {
                        id: id as u64,
                        kind,
                        payload,
                        ts: ts as u64,
                    });
                }
                Ok(out)
            });

        let first_id = page.first().map(|e| e.id);
        let last_id = page.last().map(|e| e.id);
        match (first_id, last_id) {
            (Some(first), Some(last)) => {
                if first > after + 1 && self.gap.is_none() {
                    // Trimming raced ahead of this reader between pages.
                    self.gap = Some(Gap {
                        requested_after: after,
                        oldest_retained: first,
                    });
                }
                self.after = last;
                if page.len() < PAGE_SIZE || self.after >= self.upper {
                    self.done = true;
                }
                self.buffer.extend(page);
            }
            _ => self.done = true,
        }
    }
}

impl Iterator for EventCursor {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if self.buffer.is_empty() && !self.done {
            self.fetch_page();
        }
        self.buffer.pop_front()
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    /// Nothing new since the last poll.
    Idle,
    Events(Vec<Event>),
    /// The consumer fell behind the retention window. `events` holds what is still retained;
    /// anything between `requested_after` and `oldest_retained` is lost.
    Resync { gap: Gap, events: Vec<Event> },
}

/// Cooperative polling consumer with a fixed interval.
pub struct EventPoller {
    log: EventLog,
    last_seen: u64,
    interval: Duration,
}

impl EventPoller {
    pub fn new(log: EventLog, last_seen: u64, interval: Duration) -> Self {
        Self {
            log,
            last_seen,
            interval,
        }
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn poll_once(&mut self) -> Poll {
        let mut cursor = self.log.since(self.last_seen);
        let events: Vec<Event> = cursor.by_ref().collect();
        if let Some(last) = events.last() {
            self.last_seen = last.id;
        }
        match cursor.gap() {
            Some(gap) => Poll::Resync { gap, events },
            None if events.is_empty() => Poll::Idle,
            None => Poll::Events(events),
        }
    }

    /// Poll until `handle` returns false, sleeping `interval` between polls.
    pub fn run<F>(&mut self, mut handle: F)
    where
        F: FnMut(&Poll) -> bool,
    {
        loop {
            let poll = self.poll_once();
            if !handle(&poll) {
                break;
            }
            thread::sleep(self.interval);
        }
    }
}

#[derive(Parser, Debug)]
pub struct EventsCli {
    #[clap(subcommand)]
    pub command: EventsCommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum EventsCommand {
    /// Print retained events after an id, one JSON object per line.
    Tail {
        /// Last id already seen. Defaults to the last 20 events.
        #[clap(long)]
        since: Option<u64>,
        /// Keep polling at the configured interval.
        #[clap(long)]
        follow: bool,
    },
}

fn print_events(events: &[Event]) -> Result<(), BlackboardError> {
    for event in events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

pub fn run_events_cli(store: &Store, cli: EventsCli) -> Result<(), BlackboardError> {
    let log = EventLog::new(store);
    match cli.command {
        EventsCommand::Tail { since, follow } => {
            let last_seen = since.unwrap_or_else(|| log.latest_id().saturating_sub(20));
            let interval = Duration::from_secs(store.config.events.poll_interval_secs);
            let mut poller = EventPoller::new(log, last_seen, interval);
            let mut failure = None;
            poller.run(|poll| {
                let printed = match poll {
                    Poll::Idle => Ok(()),
                    Poll::Events(events) => print_events(events),
                    Poll::Resync { gap, events } => {
                        eprintln!(
                            "{}",
                            output::to_pretty_json(&serde_json::json!({ "resync": gap }))
                        );
                        print_events(events)
                    }
                };
                if let Err(e) = printed {
                    failure = Some(e);
                    return false;
                }
                follow
            });
            if let Some(e) = failure {
                return Err(e);
            }
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "events",
        "version": "0.1.0",
        "description": "Bounded, monotonically identified coordination event log",
        "commands": [
            { "name": "tail", "description": "Print retained events after an id; optionally keep polling", "parameters": ["since", "follow"] }
        ],
        "storage": [schemas::EVENTS_DB_NAME]
    })
}
