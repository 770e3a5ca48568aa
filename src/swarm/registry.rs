//! Agent registry: one directory per agent holding an immutable profile
//! and a single-word status file. Status is the only mutable field; agent
//! directories are removed only by explicit cleanup.

use std::fmt;
use std::fs;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::id::now_ms;
use crate::swarm::{Swarm, SwarmError, SwarmResult};

pub const PROFILE_FILE: &str = "profile";
pub const STATUS_FILE: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Idle,
    Running,
    Busy,
    Off,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "IDLE",
            AgentStatus::Running => "RUNNING",
            AgentStatus::Busy => "BUSY",
            AgentStatus::Off => "OFF",
        }
    }

    /// Statuses that count as occupying a role for idempotent spawn.
    pub fn is_live(&self) -> bool {
        !matches!(self, AgentStatus::Off)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = SwarmError;

    fn from_str(s: &str) -> SwarmResult<Self> {
        match s.trim() {
            "IDLE" => Ok(AgentStatus::Idle),
            "RUNNING" => Ok(AgentStatus::Running),
            "BUSY" => Ok(AgentStatus::Busy),
            "OFF" => Ok(AgentStatus::Off),
            other => Err(SwarmError::Spawn(format!("unknown agent status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub role: String,
    pub description: String,
    pub pid: Option<u32>,
    pub registered_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub profile: AgentProfile,
    pub status: AgentStatus,
}

impl Swarm {
    /// Register an agent: create its directory tree and write profile and
    /// initial status. Safe to call for an already-registered id; the
    /// profile is overwritten, inbox contents are preserved.
    pub fn register(&self, id: &str, role: &str, description: &str, pid: Option<u32>) -> SwarmResult<AgentProfile> {
        let dir = self.agent_dir(id)?;
        fs::create_dir_all(dir.join("inbox").join("read"))?;
        let profile = AgentProfile {
            id: id.to_string(),
            role: role.to_string(),
            description: description.to_string(),
            pid,
            registered_ms: now_ms(),
        };
        fs::write(dir.join(PROFILE_FILE), serde_json::to_string_pretty(&profile)?)?;
        fs::write(dir.join(STATUS_FILE), AgentStatus::Idle.as_str())?;
        Ok(profile)
    }

    pub fn set_status(&self, id: &str, status: AgentStatus) -> SwarmResult<()> {
        let dir = self.agent_dir(id)?;
        if !dir.is_dir() {
            return Err(SwarmError::UnknownAgent(id.to_string()));
        }
        fs::write(dir.join(STATUS_FILE), status.as_str())?;
        Ok(())
    }

    pub fn status_of(&self, id: &str) -> SwarmResult<AgentStatus> {
        let dir = self.agent_dir(id)?;
        let text = fs::read_to_string(dir.join(STATUS_FILE))
            .map_err(|_| SwarmError::UnknownAgent(id.to_string()))?;
        text.parse()
    }

    pub fn profile_of(&self, id: &str) -> SwarmResult<AgentProfile> {
        let dir = self.agent_dir(id)?;
        let text = fs::read_to_string(dir.join(PROFILE_FILE))
            .map_err(|_| SwarmError::UnknownAgent(id.to_string()))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// All registered agents, sorted by id. Directories with a corrupt or
    /// missing profile are skipped rather than failing the listing.
    pub fn list_agents(&self) -> SwarmResult<Vec<AgentInfo>> {
        let mut agents = Vec::new();
        for entry in fs::read_dir(self.agents_dir())? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            let (Ok(profile), Ok(status)) = (self.profile_of(&id), self.status_of(&id)) else {
                continue;
            };
            agents.push(AgentInfo { profile, status });
        }
        agents.sort_by(|a, b| a.profile.id.cmp(&b.profile.id));
        Ok(agents)
    }

    /// The live agent currently holding `role`, if any.
    pub fn find_live_by_role(&self, role: &str) -> SwarmResult<Option<AgentInfo>> {
        Ok(self
            .list_agents()?
            .into_iter()
            .find(|a| a.profile.role == role && a.status.is_live()))
    }

    /// Explicit cleanup of one agent's directory. Never called
    /// automatically.
    pub fn remove_agent(&self, id: &str) -> SwarmResult<()> {
        let dir = self.agent_dir(id)?;
        if !dir.is_dir() {
            return Err(SwarmError::UnknownAgent(id.to_string()));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn swarm() -> (TempDir, Swarm) {
        let dir = TempDir::new().unwrap();
        let swarm = Swarm::init(dir.path().join("swarm")).unwrap();
        (dir, swarm)
    }

    #[test]
    fn test_register_and_read_back() {
        let (_dir, swarm) = swarm();
        swarm.register("builder-00001", "builder", "builds things", Some(123)).unwrap();
        let profile = swarm.profile_of("builder-00001").unwrap();
        assert_eq!(profile.role, "builder");
        assert_eq!(profile.pid, Some(123));
        assert_eq!(swarm.status_of("builder-00001").unwrap(), AgentStatus::Idle);
    }

    #[test]
    fn test_status_transitions() {
        let (_dir, swarm) = swarm();
        swarm.register("a-1", "a", "", None).unwrap();
        swarm.set_status("a-1", AgentStatus::Busy).unwrap();
        assert_eq!(swarm.status_of("a-1").unwrap(), AgentStatus::Busy);
        swarm.set_status("a-1", AgentStatus::Off).unwrap();
        assert_eq!(swarm.status_of("a-1").unwrap(), AgentStatus::Off);
    }

    #[test]
    fn test_status_of_unknown_agent() {
        let (_dir, swarm) = swarm();
        assert!(matches!(
            swarm.status_of("ghost"),
            Err(SwarmError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_list_agents_sorted() {
        let (_dir, swarm) = swarm();
        swarm.register("b-2", "b", "", None).unwrap();
        swarm.register("a-1", "a", "", None).unwrap();
        let agents = swarm.list_agents().unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].profile.id, "a-1");
        assert_eq!(agents[1].profile.id, "b-2");
    }

    #[test]
    fn test_find_live_by_role_ignores_off() {
        let (_dir, swarm) = swarm();
        swarm.register("builder-1", "builder", "", None).unwrap();
        swarm.set_status("builder-1", AgentStatus::Off).unwrap();
        assert!(swarm.find_live_by_role("builder").unwrap().is_none());

        swarm.register("builder-2", "builder", "", None).unwrap();
        let found = swarm.find_live_by_role("builder").unwrap().unwrap();
        assert_eq!(found.profile.id, "builder-2");
    }

    #[test]
    fn test_remove_agent_is_explicit() {
        let (_dir, swarm) = swarm();
        swarm.register("gone-1", "gone", "", None).unwrap();
        swarm.set_status("gone-1", AgentStatus::Off).unwrap();
        // Still listed while OFF.
        assert_eq!(swarm.list_agents().unwrap().len(), 1);
        swarm.remove_agent("gone-1").unwrap();
        assert!(swarm.list_agents().unwrap().is_empty());
    }
}
