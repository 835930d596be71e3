//! Centralized storage layout and database schema definitions.
//!
//! Every record set owns its own SQLite database so that writers to one set never contend
//! with writers to another:
//! 1. claims.db: advisory resource claims, keyed by path.
//! 2. artifacts.db: produced artifacts (keyed by path hash) and their dependency edges.
//! 3. events.db: the bounded, monotonically-identified coordination event log.
//! 4. decisions.db: the append-only decision ledger.
//!
//! Session snapshots are plain files under `sessions/` (see `plugins::session`).

// --- 1. Claims ---
pub const CLAIMS_DB_NAME: &str = "claims.db";

pub const CLAIMS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS claims (
        path TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        scope TEXT NOT NULL,
        acquired_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_claims_holder ON claims(holder);
";

// --- 2. Artifacts ---
pub const ARTIFACTS_DB_NAME: &str = "artifacts.db";

pub const ARTIFACTS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS artifacts (
        path_hash TEXT PRIMARY KEY,
        path TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        exports TEXT NOT NULL DEFAULT '[]', -- JSON array of symbol names
        scope TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 1,
        registered_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS artifact_deps (
        artifact_hash TEXT NOT NULL,
        dep_path TEXT NOT NULL,
        PRIMARY KEY(artifact_hash, dep_path),
        FOREIGN KEY(artifact_hash) REFERENCES artifacts(path_hash) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_artifact_deps_dep ON artifact_deps(dep_path);
";

// --- 3. Events ---
pub const EVENTS_DB_NAME: &str = "events.db";

pub const EVENTS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        ts INTEGER NOT NULL
    );
";

/// Meta key holding the last id handed out; survives trimming so ids never repeat.
pub const EVENTS_META_LAST_ID: &str = "last_id";

// --- 4. Decisions ---
pub const DECISIONS_DB_NAME: &str = "decisions.db";

pub const DECISIONS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS decisions (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        statement TEXT NOT NULL,
        rationale TEXT NOT NULL,
        made_by TEXT NOT NULL,
        affects TEXT NOT NULL DEFAULT '[]', -- JSON array of scopes
        ts INTEGER NOT NULL
    );
";

// --- 5. Sessions (files) ---
pub const SESSIONS_DIR_NAME: &str = "sessions";
pub const SESSIONS_ARCHIVE_DIR_NAME: &str = "archive";
pub const SESSION_LATEST_POINTER: &str = "LATEST";
pub const SESSION_RECORD_EXT: &str = "json";
pub const SESSION_SUMMARY_EXT: &str = "md";
pub const SESSION_STALE_MARKER_EXT: &str = "stale";

// --- 6. External documents ---
pub const STATE_DOC_NAME: &str = "state.json";
pub const CONFIG_FILE_NAME: &str = "config.toml";
