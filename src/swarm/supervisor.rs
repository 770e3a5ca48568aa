//! Worker spawning and supervision. A worker is this same binary run as an
//! independent background process with its own agent identity, capped
//! virtual memory and CPU time so a misbehaving child (or accidental
//! recursive spawning) cannot take the machine down. The parent never
//! joins a worker except through an explicit `wait`, and the spawning
//! process usually exits long before the detached child does, so the
//! worker finalizes its own registry entry through `finish_worker` when
//! its run ends, successful or not. The parent's supervision thread calls
//! the same idempotent path for the `wait` case.

use std::fs;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use log::{info, warn};

use crate::id::derive_agent_id;
use crate::swarm::events::event_types;
use crate::swarm::registry::AgentStatus;
use crate::swarm::{Swarm, SwarmError, SwarmResult};

/// What to launch a worker with.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub tool: String,
    pub model: String,
    pub max_iterations: u32,
    pub memory_mb: u64,
    pub cpu_secs: u64,
}

/// Handle to a spawned worker. Dropping it never kills the child.
pub struct WorkerHandle {
    pub agent_id: String,
    pub pid: u32,
    supervision: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Optional explicit join: block until the worker exits and its
    /// completion event is emitted.
    pub fn wait(mut self) {
        if let Some(handle) = self.supervision.take() {
            let _ = handle.join();
        }
    }
}

/// Outcome of a spawn request.
pub enum SpawnOutcome {
    Started(WorkerHandle),
    /// A live agent already holds the role; no new process was launched.
    AlreadyRunning(String),
}

impl SpawnOutcome {
    pub fn agent_id(&self) -> &str {
        match self {
            SpawnOutcome::Started(h) => &h.agent_id,
            SpawnOutcome::AlreadyRunning(id) => id,
        }
    }
}

/// True if a process with this pid exists (signal 0 probe).
pub fn is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Deliver SIGTERM to a worker's recorded pid.
pub fn terminate(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGTERM) == 0 }
}

/// Advisory exclusive lock over the swarm root's spawn section, held for
/// the whole check-then-register window so two concurrent spawns of the
/// same role cannot both pass the liveness check. Released when dropped.
struct SpawnLock(fs::File);

impl SpawnLock {
    fn acquire(root: &Path) -> SwarmResult<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(root.join("spawn.lock"))?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(SwarmError::Spawn(format!(
                "cannot lock spawn section: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Self(file))
    }
}

impl Swarm {
    /// Final registry write when a worker's run ends, whatever the outcome:
    /// flip the agent OFF and record a completion event. Idempotent, so the
    /// worker's own finalization and a waiting parent's supervision thread
    /// never double-report.
    pub fn finish_worker(&self, agent_id: &str, detail: &str) -> SwarmResult<()> {
        if self.status_of(agent_id)? == AgentStatus::Off {
            return Ok(());
        }
        self.set_status(agent_id, AgentStatus::Off)?;
        self.emit_event(agent_id, event_types::AGENT_COMPLETED, detail)?;
        Ok(())
    }

    /// Spawn a worker for `role` with `task` as its scoped instruction.
    ///
    /// Idempotent per role: if a registered agent with this role is
    /// IDLE/RUNNING/BUSY and its recorded process is still alive, the
    /// existing id is returned and nothing is launched. A live status with
    /// a dead pid is repaired to OFF first.
    pub fn spawn_worker(&self, role: &str, task: &str, spec: &SpawnSpec) -> SwarmResult<SpawnOutcome> {
        let _lock = SpawnLock::acquire(self.root())?;
        if let Some(existing) = self.find_live_by_role(role)? {
            let stale = matches!(existing.profile.pid, Some(pid) if !is_alive(pid));
            if stale {
                warn!(
                    "agent {} recorded pid {:?} no longer running; marking OFF",
                    existing.profile.id, existing.profile.pid
                );
                self.set_status(&existing.profile.id, AgentStatus::Off)?;
            } else {
                info!(
                    "role '{}' already held by live agent {}",
                    role, existing.profile.id
                );
                return Ok(SpawnOutcome::AlreadyRunning(existing.profile.id));
            }
        }

        let agent_id = derive_agent_id(role);
        fs::write(self.task_path(&agent_id)?, task)?;
        self.register(&agent_id, role, task.lines().next().unwrap_or(""), None)?;

        let agent_dir = self.agent_dir(&agent_id)?;
        let log_file = fs::File::create(agent_dir.join("worker.log"))?;
        let err_file = log_file.try_clone()?;

        let exe = std::env::current_exe()
            .map_err(|e| SwarmError::Spawn(format!("cannot locate own binary: {}", e)))?;
        let mut cmd = Command::new(exe);
        cmd.arg("run")
            .args(["--agent-id", &agent_id])
            .args(["--tool", &spec.tool])
            .args(["--model", &spec.model])
            .args(["--max-iterations", &spec.max_iterations.to_string()])
            .env("DROVER_SWARM_ROOT", self.root())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(err_file));

        let memory_bytes = spec.memory_mb * 1024 * 1024;
        let cpu_secs = spec.cpu_secs;
        unsafe {
            cmd.pre_exec(move || {
                // Detach from the parent's session and cap the child.
                libc::setsid();
                let mem = libc::rlimit {
                    rlim_cur: memory_bytes,
                    rlim_max: memory_bytes,
                };
                libc::setrlimit(libc::RLIMIT_AS, &mem);
                let cpu = libc::rlimit {
                    rlim_cur: cpu_secs,
                    rlim_max: cpu_secs,
                };
                libc::setrlimit(libc::RLIMIT_CPU, &cpu);
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SwarmError::Spawn(format!("failed to launch worker: {}", e)))?;
        let pid = child.id();

        self.register(&agent_id, role, task.lines().next().unwrap_or(""), Some(pid))?;
        self.set_status(&agent_id, AgentStatus::Running)?;
        self.emit_event("supervisor", event_types::AGENT_SPAWNED, &agent_id)?;
        info!("spawned worker {} (pid {}) for role '{}'", agent_id, pid, role);

        // Supervision for the `wait` path; the worker also finalizes
        // itself, so whichever side observes the exit first wins.
        let swarm = self.clone();
        let supervised_id = agent_id.clone();
        let supervision = thread::spawn(move || {
            let status = child.wait();
            let detail = match status {
                Ok(s) => format!("{} exit={}", supervised_id, s.code().unwrap_or(-1)),
                Err(e) => format!("{} wait-error={}", supervised_id, e),
            };
            if let Err(e) = swarm.finish_worker(&supervised_id, &detail) {
                warn!("failed to finalize {}: {}", supervised_id, e);
            }
        });

        Ok(SpawnOutcome::Started(WorkerHandle {
            agent_id,
            pid,
            supervision: Some(supervision),
        }))
    }
}
