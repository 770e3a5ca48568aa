//! Swarm coordination over a shared filesystem namespace:
//!
//! ```text
//! swarm-root/
//!   config            swarm-wide settings
//!   events.jsonl      append-only event bus
//!   agents/<id>/      profile, status, inbox/, inbox/read/
//!   tasks/<id>        scoped instruction file for a spawned worker
//! ```
//!
//! Every path under the root is derived from a sanitized agent id; ids are
//! rejected outright (fail closed) on any character outside
//! `[A-Za-z0-9_-]`, and resolved paths are re-checked for containment
//! before any write.

pub mod events;
pub mod mailbox;
pub mod registry;
pub mod supervisor;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::id::is_safe_id;

pub const AGENTS_DIR: &str = "agents";
pub const TASKS_DIR: &str = "tasks";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const CONFIG_FILE: &str = "config";

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("invalid agent id '{0}': only [A-Za-z0-9_-] is allowed")]
    InvalidId(String),

    #[error("no such agent '{0}'")]
    UnknownAgent(String),

    #[error("swarm root not initialized at {0}")]
    MissingRoot(PathBuf),

    #[error("path {0} escapes the swarm root")]
    PathEscape(PathBuf),

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SwarmResult<T> = std::result::Result<T, SwarmError>;

/// Handle to a swarm namespace rooted at one directory.
#[derive(Debug, Clone)]
pub struct Swarm {
    root: PathBuf,
}

impl Swarm {
    /// Open an existing swarm root.
    pub fn open(root: impl Into<PathBuf>) -> SwarmResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SwarmError::MissingRoot(root));
        }
        Ok(Self { root })
    }

    /// Create the swarm directory layout if absent, then open it.
    pub fn init(root: impl Into<PathBuf>) -> SwarmResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(AGENTS_DIR))?;
        fs::create_dir_all(root.join(TASKS_DIR))?;
        let config = root.join(CONFIG_FILE);
        if !config.exists() {
            fs::write(&config, "version=1\n")?;
        }
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join(AGENTS_DIR)
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join(EVENTS_FILE)
    }

    /// Directory for one agent, id-checked and containment-checked.
    pub fn agent_dir(&self, id: &str) -> SwarmResult<PathBuf> {
        self.contained(self.agents_dir(), id)
    }

    /// Task file for one spawned worker, same checks.
    pub fn task_path(&self, id: &str) -> SwarmResult<PathBuf> {
        self.contained(self.root.join(TASKS_DIR), id)
    }

    /// Reject unsafe ids, then verify the joined path still resolves
    /// inside the swarm root. The second check is deliberately redundant
    /// with sanitization: ids map directly to filesystem paths.
    fn contained(&self, base: PathBuf, id: &str) -> SwarmResult<PathBuf> {
        if !is_safe_id(id) {
            return Err(SwarmError::InvalidId(id.to_string()));
        }
        let path = base.join(id);
        let canonical_root = self.root.canonicalize()?;
        let check = match path.canonicalize() {
            Ok(p) => p,
            // Not created yet: check the nearest existing ancestor.
            Err(_) => match base.canonicalize() {
                Ok(b) => b.join(id),
                Err(_) => return Err(SwarmError::MissingRoot(base)),
            },
        };
        if !check.starts_with(&canonical_root) {
            return Err(SwarmError::PathEscape(path));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_root_fails() {
        let err = Swarm::open("/nonexistent/swarm").unwrap_err();
        assert!(matches!(err, SwarmError::MissingRoot(_)));
    }

    #[test]
    fn test_init_creates_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("swarm");
        let swarm = Swarm::init(&root).unwrap();
        assert!(swarm.agents_dir().is_dir());
        assert!(root.join(TASKS_DIR).is_dir());
        assert!(root.join(CONFIG_FILE).is_file());
    }

    #[test]
    fn test_agent_dir_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let swarm = Swarm::init(dir.path().join("swarm")).unwrap();
        for bad in ["../escape", "a/b", "a\\b", "..", "", "dot.dot"] {
            let err = swarm.agent_dir(bad).unwrap_err();
            assert!(
                matches!(err, SwarmError::InvalidId(_)),
                "expected InvalidId for {:?}",
                bad
            );
        }
        // Nothing was created.
        assert_eq!(fs::read_dir(swarm.agents_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_agent_dir_accepts_safe_ids() {
        let dir = TempDir::new().unwrap();
        let swarm = Swarm::init(dir.path().join("swarm")).unwrap();
        let path = swarm.agent_dir("builder-00042").unwrap();
        assert!(path.starts_with(swarm.root()));
    }
}
