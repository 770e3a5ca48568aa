//! Planning-artifact storage: the requirements document, execution plan,
//! and architecture diagram the agent maintains between iterations, plus
//! the checkpoint file and per-iteration metrics log under `.drover/`.

pub mod diagram;
pub mod plan;
pub mod requirements;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{DroverError, Result};

pub const REQUIREMENTS_FILE: &str = "REQUIREMENTS.json";
pub const PLAN_FILE: &str = "PLAN.md";
pub const DIAGRAM_FILE: &str = "ARCHITECTURE.mmd";
pub const STATE_DIR: &str = ".drover";
pub const CHECKPOINT_FILE: &str = "checkpoint";
pub const METRICS_FILE: &str = "metrics.jsonl";

/// One metrics line, appended after every iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub tool: String,
    pub model: String,
    pub classification: String,
    pub token_estimate: usize,
    pub exit_code: i32,
    pub duration_secs: f64,
    pub timestamp: String,
}

/// Reads and writes the planning artifacts relative to a project root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn requirements_path(&self) -> PathBuf {
        self.root.join(REQUIREMENTS_FILE)
    }

    pub fn plan_path(&self) -> PathBuf {
        self.root.join(PLAN_FILE)
    }

    pub fn diagram_path(&self) -> PathBuf {
        self.root.join(DIAGRAM_FILE)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Raw contents of an artifact, or None if the file does not exist.
    pub fn read_raw(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_requirements(&self) -> Result<Option<String>> {
        self.read_raw(&self.requirements_path())
    }

    pub fn read_plan(&self) -> Result<Option<String>> {
        self.read_raw(&self.plan_path())
    }

    pub fn read_diagram(&self) -> Result<Option<String>> {
        self.read_raw(&self.diagram_path())
    }

    fn ensure_state_dir(&self) -> Result<PathBuf> {
        let dir = self.state_dir();
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Persist the index of the last completed iteration. Durable before
    /// the next iteration begins: written to a temp file then renamed.
    pub fn save_checkpoint(&self, iteration: u32) -> Result<()> {
        let dir = self.ensure_state_dir()?;
        let tmp = dir.join(format!("{}.tmp", CHECKPOINT_FILE));
        fs::write(&tmp, iteration.to_string())?;
        fs::rename(&tmp, dir.join(CHECKPOINT_FILE))?;
        Ok(())
    }

    /// Last completed iteration, or None if absent or unreadable. A
    /// malformed checkpoint logs a warning and reads as None so a resume
    /// restarts at 1 instead of failing.
    pub fn load_checkpoint(&self) -> Option<u32> {
        let path = self.state_dir().join(CHECKPOINT_FILE);
        let text = fs::read_to_string(&path).ok()?;
        match text.trim().parse::<u32>() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!("ignoring malformed checkpoint at {}", path.display());
                None
            }
        }
    }

    /// Append one metrics record as a JSONL line.
    pub fn append_metrics(&self, record: &IterationRecord) -> Result<()> {
        let dir = self.ensure_state_dir()?;
        let line = serde_json::to_string(record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(METRICS_FILE))?;
        use std::io::Write;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// All metrics records, skipping unparseable lines.
    pub fn read_metrics(&self) -> Result<Vec<IterationRecord>> {
        let path = self.state_dir().join(METRICS_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<IterationRecord>(line) {
                Ok(r) => records.push(r),
                Err(e) => warn!("skipping malformed metrics line: {}", e),
            }
        }
        Ok(records)
    }

    /// Rotate a fully completed plan into `.drover/archive/` so a fresh
    /// run starts with a clean plan. Skipped when the requirements name a
    /// branch (the plan belongs to in-flight branch work) or when archiving
    /// is disabled.
    pub fn archive_plan_if_complete(&self, disabled: bool) -> Result<bool> {
        if disabled {
            return Ok(false);
        }
        let Some(plan_text) = self.read_plan()? else {
            return Ok(false);
        };
        let parsed = plan::parse(&plan_text);
        if parsed.total() == 0 || parsed.pending_count() > 0 {
            return Ok(false);
        }
        if let Some(req_text) = self.read_requirements()? {
            if let Ok(req) = requirements::parse(&req_text) {
                if req.branch_name.is_some() {
                    return Ok(false);
                }
            }
        }
        let archive_dir = self.ensure_state_dir()?.join("archive");
        fs::create_dir_all(&archive_dir)?;
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let dest = archive_dir.join(format!("PLAN-{}.md", stamp));
        fs::rename(self.plan_path(), &dest).map_err(|e| {
            DroverError::Artifact(format!("failed to archive plan: {}", e))
        })?;
        info!("archived completed plan to {}", dest.display());
        Ok(true)
    }
}
