//! Task engine boundary. The loop only needs four operations from the
//! dependency-aware task store: create, close, list ready, and count by
//! status. `TaskBoard` is the bundled implementation: an append-only JSONL
//! audit log as source of truth plus a SQLite index for queries.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::error::{DroverError, Result};
use crate::id::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DroverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "closed" => Ok(TaskStatus::Closed),
            other => Err(DroverError::Storage(format!("unknown task status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    pub deps: Vec<String>,
    pub created_ms: u64,
}

/// The four operations the loop is allowed to need.
pub trait TaskEngine {
    fn create(
        &mut self,
        title: &str,
        description: &str,
        deps: &[String],
        assignee: Option<&str>,
    ) -> Result<String>;

    fn close(&mut self, id: &str) -> Result<()>;

    /// Open tasks whose dependencies are all closed. `unassigned_only`
    /// additionally filters to tasks with no assignee.
    fn list_ready(&self, unassigned_only: bool) -> Result<Vec<Task>>;

    fn count_by_status(&self) -> Result<HashMap<TaskStatus, u64>>;
}

/// JSONL log + SQLite index. The log is append-only and never rewritten;
/// the index carries the queryable current state.
pub struct TaskBoard {
    conn: Connection,
    log_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct LogLine<'a> {
    ts_ms: u64,
    op: &'a str,
    task_id: &'a str,
    detail: &'a str,
}

impl TaskBoard {
    /// Open (creating if needed) the board under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("tasks.db"))
            .map_err(|e| DroverError::Storage(format!("failed to open task index: {}", e)))?;
        // Concurrent siblings share the db file; block instead of failing
        // when another writer holds the write lock.
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(storage_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                description TEXT NOT NULL,
                status      TEXT NOT NULL,
                assignee    TEXT,
                created_ms  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS task_deps (
                task_id TEXT NOT NULL,
                dep_id  TEXT NOT NULL,
                PRIMARY KEY (task_id, dep_id)
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);",
        )
        .map_err(|e| DroverError::Storage(format!("failed to init task schema: {}", e)))?;

        Ok(Self {
            conn,
            log_path: dir.join("tasks.jsonl"),
        })
    }

    fn append_log(&self, op: &str, task_id: &str, detail: &str) -> Result<()> {
        let line = serde_json::to_string(&LogLine {
            ts_ms: now_ms(),
            op,
            task_id,
            detail,
        })?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn row_to_task(&self, id: String, title: String, description: String, status: String, assignee: Option<String>, created_ms: i64) -> Result<Task> {
        let mut stmt = self
            .conn
            .prepare("SELECT dep_id FROM task_deps WHERE task_id = ?1 ORDER BY dep_id")
            .map_err(storage_err)?;
        let deps = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        Ok(Task {
            id,
            title,
            description,
            status: status.parse()?,
            assignee,
            deps,
            created_ms: created_ms as u64,
        })
    }
}

fn storage_err(e: rusqlite::Error) -> DroverError {
    DroverError::Storage(e.to_string())
}

impl TaskEngine for TaskBoard {
    fn create(
        &mut self,
        title: &str,
        description: &str,
        deps: &[String],
        assignee: Option<&str>,
    ) -> Result<String> {
        let created = now_ms();

        // The id sequence and the dependency check both live inside one
        // immediate transaction, so concurrent boards on the same db file
        // serialize instead of minting the same id.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err)?;

        let seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(CAST(substr(id, 6) AS INTEGER)), 0) + 1 FROM tasks",
                [],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        let id = format!("task-{:04}", seq);

        // A task with unclosed dependencies starts blocked.
        let mut status = TaskStatus::Open;
        for dep in deps {
            let dep_status: Option<String> = tx
                .query_row(
                    "SELECT status FROM tasks WHERE id = ?1",
                    params![dep],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    e => Err(storage_err(e)),
                })?;
            match dep_status {
                Some(s) if s == "closed" => {}
                Some(_) => status = TaskStatus::Blocked,
                None => {
                    return Err(DroverError::Storage(format!(
                        "dependency '{}' does not exist",
                        dep
                    )))
                }
            }
        }

        tx.execute(
            "INSERT INTO tasks (id, title, description, status, assignee, created_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, title, description, status.as_str(), assignee, created as i64],
        )
        .map_err(storage_err)?;
        for dep in deps {
            tx.execute(
                "INSERT OR IGNORE INTO task_deps (task_id, dep_id) VALUES (?1, ?2)",
                params![id, dep],
            )
            .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        self.append_log("create", &id, title)?;
        Ok(id)
    }

    fn close(&mut self, id: &str) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE tasks SET status = 'closed' WHERE id = ?1",
                params![id],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(DroverError::Storage(format!("no task '{}' to close", id)));
        }
        // Unblock tasks whose dependencies are now all closed.
        self.conn
            .execute(
                "UPDATE tasks SET status = 'open'
                 WHERE status = 'blocked'
                   AND NOT EXISTS (
                     SELECT 1 FROM task_deps d
                     JOIN tasks t ON t.id = d.dep_id
                     WHERE d.task_id = tasks.id AND t.status != 'closed')",
                [],
            )
            .map_err(storage_err)?;
        self.append_log("close", id, "")?;
        Ok(())
    }

    fn list_ready(&self, unassigned_only: bool) -> Result<Vec<Task>> {
        let sql = if unassigned_only {
            "SELECT id, title, description, status, assignee, created_ms FROM tasks
             WHERE status = 'open' AND assignee IS NULL
               AND NOT EXISTS (
                 SELECT 1 FROM task_deps d
                 JOIN tasks t ON t.id = d.dep_id
                 WHERE d.task_id = tasks.id AND t.status != 'closed')
             ORDER BY created_ms, id"
        } else {
            "SELECT id, title, description, status, assignee, created_ms FROM tasks
             WHERE status = 'open'
               AND NOT EXISTS (
                 SELECT 1 FROM task_deps d
                 JOIN tasks t ON t.id = d.dep_id
                 WHERE d.task_id = tasks.id AND t.status != 'closed')
             ORDER BY created_ms, id"
        };
        let mut stmt = self.conn.prepare(sql).map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(storage_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        let mut tasks = Vec::with_capacity(rows.len());
        for (id, title, description, status, assignee, created) in rows {
            tasks.push(self.row_to_task(id, title, description, status, assignee, created)?);
        }
        Ok(tasks)
    }

    fn count_by_status(&self) -> Result<HashMap<TaskStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(storage_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        let mut counts = HashMap::new();
        for (status, count) in rows {
            counts.insert(status.parse::<TaskStatus>()?, count as u64);
        }
        Ok(counts)
    }
}

/// True when no task is open, in progress, or blocked.
pub fn all_tasks_closed(engine: &dyn TaskEngine) -> Result<bool> {
    let counts = engine.count_by_status()?;
    let outstanding = counts.get(&TaskStatus::Open).copied().unwrap_or(0)
        + counts.get(&TaskStatus::InProgress).copied().unwrap_or(0)
        + counts.get(&TaskStatus::Blocked).copied().unwrap_or(0);
    Ok(outstanding == 0)
}
