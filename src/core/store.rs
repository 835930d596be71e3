//! Store abstraction for the blackboard's on-disk state.
//!
//! A store is a single directory (normally `<project>/.blackboard`) holding one SQLite
//! database per record set, the session snapshot tree, the optional state document, and
//! the optional `config.toml`.

use crate::core::config::BlackboardConfig;
use crate::core::error::BlackboardError;
use crate::core::schemas;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the store directory searched for from the working directory upwards.
pub const STORE_DIR_NAME: &str = ".blackboard";

/// Environment override for the store root.
pub const STORE_ROOT_ENV: &str = "BLACKBOARD_ROOT";

/// Store handle: a root directory plus the configuration loaded from it.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
    /// Effective configuration (defaults when `config.toml` is absent or malformed)
    pub config: BlackboardConfig,
}

impl Store {
    /// Open a store rooted at `root`, creating the directory tree if needed.
    pub fn open(root: &Path) -> Result<Self, BlackboardError> {
        fs::create_dir_all(root)?;
        fs::create_dir_all(root.join(schemas::SESSIONS_DIR_NAME))?;
        fs::create_dir_all(
            root.join(schemas::SESSIONS_DIR_NAME)
                .join(schemas::SESSIONS_ARCHIVE_DIR_NAME),
        )?;
        let config = BlackboardConfig::load(root);
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join(schemas::SESSIONS_DIR_NAME)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.sessions_dir().join(schemas::SESSIONS_ARCHIVE_DIR_NAME)
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(schemas::STATE_DOC_NAME)
    }

    /// The project directory owning this store (the working tree agents edit).
    pub fn project_root(&self) -> PathBuf {
        match self.root.parent() {
            Some(parent) if self.root.file_name().is_some_and(|n| n == STORE_DIR_NAME) => {
                parent.to_path_buf()
            }
            _ => self.root.clone(),
        }
    }
}

/// Locate the store root: `$BLACKBOARD_ROOT`, else the nearest `.blackboard` directory
/// walking up from `start_dir`.
pub fn find_store_root(start_dir: &Path) -> Result<PathBuf, BlackboardError> {
    if let Ok(root) = std::env::var(STORE_ROOT_ENV)
        && !root.trim().is_empty()
    {
        return Ok(PathBuf::from(root));
    }
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        let candidate = current_dir.join(STORE_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !current_dir.pop() {
            return Err(BlackboardError::NotFound(
                "'.blackboard' directory not found in current or parent directories. Run `blackboard init` first.".to_string(),
            ));
        }
    }
}
