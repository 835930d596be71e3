use crate::core::error::BlackboardError;
use crate::core::time;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection busy_timeout; covers cross-process writers racing on the same database.
const BUSY_TIMEOUT_SECS: u64 = 5;

/// A record-set database: file name plus the idempotent schema that must exist before use.
#[derive(Debug, Clone, Copy)]
pub struct DbSpec {
    pub name: &'static str,
    pub schema: &'static str,
}

impl DbSpec {
    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(self.name)
    }
}

pub fn db_connect(db_path: &Path) -> Result<Connection, BlackboardError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Open a database for writing, creating its schema. A file that is not a valid SQLite
/// database is moved aside as `<name>.corrupt-<epoch>` and replaced by an empty one.
pub fn open_for_write(spec: &DbSpec, root: &Path) -> Result<Connection, BlackboardError> {
    let db_path = spec.path(root);
    match db_connect(&db_path).and_then(|conn| {
        conn.execute_batch(spec.schema)?;
        Ok(conn)
    }) {
        Ok(conn) => Ok(conn),
        Err(e) if is_corruption(&e) => {
            let quarantine = quarantine_path(&db_path);
            tracing::warn!(
                db = spec.name,
                moved_to = %quarantine.display(),
                error = %e,
                "malformed database replaced with an empty collection"
            );
            fs::rename(&db_path, &quarantine)?;
            for suffix in ["-wal", "-shm"] {
                let side = PathBuf::from(format!("{}{}", db_path.display(), suffix));
                if side.exists() {
                    let _ = fs::remove_file(side);
                }
            }
            let conn = db_connect(&db_path)?;
            conn.execute_batch(spec.schema)?;
            Ok(conn)
        }
        Err(e) => Err(e),
    }
}

/// Open a database for reading. Returns `None` when it has never been written.
pub fn open_for_read(spec: &DbSpec, root: &Path) -> Result<Option<Connection>, BlackboardError> {
    let db_path = spec.path(root);
    if !db_path.exists() {
        return Ok(None);
    }
    let conn = db_connect(&db_path)?;
    Ok(Some(conn))
}

/// Whether an error means the persisted bytes are not a usable database.
pub fn is_corruption(err: &BlackboardError) -> bool {
    match err {
        BlackboardError::RusqliteError(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::NotADatabase | rusqlite::ErrorCode::DatabaseCorrupt
        ),
        _ => false,
    }
}

/// Whether an error is a busy/locked condition worth reporting as transient.
pub fn is_busy(err: &BlackboardError) -> bool {
    match err {
        BlackboardError::RusqliteError(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

fn quarantine_path(db_path: &Path) -> PathBuf {
    PathBuf::from(format!(
        "{}.corrupt-{}",
        db_path.display(),
        time::now_epoch_secs()
    ))
}
