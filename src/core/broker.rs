use crate::core::db::{self, DbSpec};
use crate::core::error::BlackboardError;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// The DB Broker is the "Thin Waist" for state access.
///
/// Every mutation of a record set is serialized twice: by an in-process write lock per
/// database file, and by an `IMMEDIATE` SQLite transaction that excludes writers in other
/// processes. Readers take neither; WAL mode gives them a consistent view.
pub struct DbBroker {
    root: PathBuf,
}

fn write_lock_for(db_path: &Path) -> Result<Arc<Mutex<()>>, BlackboardError> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks
        .lock()
        .map_err(|_| BlackboardError::LockPoisoned("broker lock table".to_string()))?;
    Ok(locks
        .entry(db_path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone())
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Execute a closure inside a serialized write transaction on the given record set.
    /// The transaction commits when the closure returns `Ok`, and rolls back otherwise.
    pub fn with_write<F, R>(
        &self,
        spec: &DbSpec,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, BlackboardError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, BlackboardError>,
    {
        let db_path = spec.path(&self.root);
        let lock = write_lock_for(&db_path)?;
        let _guard = lock
            .lock()
            .map_err(|_| BlackboardError::LockPoisoned(format!("write lock for {}", spec.name)))?;

        let result: Result<R, BlackboardError> = (|| {
            let mut conn = db::open_for_write(spec, &self.root)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })();

        match &result {
            Ok(_) => {
                tracing::debug!(db = spec.name, actor, op = op_name, "brokered write committed")
            }
            Err(e) if db::is_busy(e) => tracing::warn!(
                db = spec.name,
                actor,
                op = op_name,
                error = %e,
                "brokered write hit a busy database"
            ),
            Err(e) => tracing::debug!(
                db = spec.name,
                actor,
                op = op_name,
                error = %e,
                "brokered write rolled back"
            ),
        }
        result
    }

    /// Execute a closure with a read connection. `Ok(None)` means the record set has never
    /// been written.
    pub fn with_read<F, R>(&self, spec: &DbSpec, f: F) -> Result<Option<R>, BlackboardError>
    where
        F: FnOnce(&Connection) -> Result<R, BlackboardError>,
    {
        match db::open_for_read(spec, &self.root)? {
            Some(conn) => f(&conn).map(Some),
            None => Ok(None),
        }
    }

    /// Read with the store-surface fallback: a missing, unreadable, or malformed record set
    /// reads as the empty default. The failure is logged, never propagated.
    pub fn read_or_default<F, R>(&self, spec: &DbSpec, op_name: &str, f: F) -> R
    where
        F: FnOnce(&Connection) -> Result<R, BlackboardError>,
        R: Default,
    {
        match self.with_read(spec, f) {
            Ok(Some(value)) => value,
            Ok(None) => R::default(),
            Err(e) => {
                tracing::warn!(
                    db = spec.name,
                    op = op_name,
                    error = %e,
                    "read failed; using empty default"
                );
                R::default()
            }
        }
    }
}
