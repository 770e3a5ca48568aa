//! Append-only event bus: one JSONL file at the swarm root. Writers only
//! ever append; readers filter on a trailing time window. No record is
//! mutated or deleted by anything in this crate.

use std::fs;
use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::{generate_event_id, now_ms};
use crate::swarm::{Swarm, SwarmResult};

/// Event type constants used across the swarm.
pub mod event_types {
    pub const AGENT_SPAWNED: &str = "agent_spawned";
    pub const AGENT_COMPLETED: &str = "agent_completed";
    pub const MESSAGE_SENT: &str = "message_sent";
    pub const TASK_CREATED: &str = "task_created";
    pub const TASK_CLOSED: &str = "task_closed";
    pub const ITERATION_COMPLETED: &str = "iteration_completed";
    pub const RUN_COMPLETED: &str = "run_completed";
    pub const RUN_FAILED: &str = "run_failed";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub sender: String,
    pub event_type: String,
    pub payload: String,
    pub ts_ms: u64,
}

impl Swarm {
    /// Append one event. O_APPEND keeps concurrent siblings from
    /// interleaving partial lines on any POSIX filesystem.
    pub fn emit_event(&self, sender: &str, event_type: &str, payload: &str) -> SwarmResult<EventRecord> {
        let record = EventRecord {
            id: generate_event_id(),
            sender: sender.to_string(),
            event_type: event_type.to_string(),
            payload: payload.to_string(),
            ts_ms: now_ms(),
        };
        let line = serde_json::to_string(&record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())?;
        writeln!(file, "{}", line)?;
        Ok(record)
    }

    /// Events within the trailing `window`, oldest first. Malformed lines
    /// are skipped; an absent log reads as empty.
    pub fn recent_events(&self, window: Duration) -> SwarmResult<Vec<EventRecord>> {
        let text = match fs::read_to_string(self.events_path()) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let cutoff = now_ms().saturating_sub(window.as_millis() as u64);
        Ok(text
            .lines()
            .filter_map(|line| serde_json::from_str::<EventRecord>(line).ok())
            .filter(|r| r.ts_ms >= cutoff)
            .collect())
    }

    /// Human-readable rendering of the recent window for context assembly.
    pub fn recent_events_text(&self, window: Duration) -> SwarmResult<String> {
        let events = self.recent_events(window)?;
        if events.is_empty() {
            return Ok("(no recent swarm events)".to_string());
        }
        let mut out = String::new();
        for event in events {
            out.push_str(&format!(
                "[{}] {} {}: {}\n",
                event.ts_ms, event.sender, event.event_type, event.payload
            ));
        }
        Ok(out)
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
    fn test_emit_and_read_back() {
        let (_dir, swarm) = swarm();
        swarm
            .emit_event("parent", event_types::AGENT_SPAWNED, "builder-1")
            .unwrap();
        let events = swarm.recent_events(Duration::from_secs(120)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "agent_spawned");
        assert_eq!(events[0].payload, "builder-1");
    }

    #[test]
    fn test_empty_log_reads_as_empty() {
        let (_dir, swarm) = swarm();
        assert!(swarm.recent_events(Duration::from_secs(60)).unwrap().is_empty());
        assert_eq!(
            swarm.recent_events_text(Duration::from_secs(60)).unwrap(),
            "(no recent swarm events)"
        );
    }

    #[test]
    fn test_window_excludes_old_events() {
        let (_dir, swarm) = swarm();
        // Write an old record directly; emit_event always stamps now.
        let old = EventRecord {
            id: "evt-old".to_string(),
            sender: "s".to_string(),
            event_type: "t".to_string(),
            payload: "stale".to_string(),
            ts_ms: now_ms() - 600_000,
        };
        let mut text = serde_json::to_string(&old).unwrap();
        text.push('\n');
        fs::write(swarm.events_path(), text).unwrap();
        swarm.emit_event("s", "t", "fresh").unwrap();

        let events = swarm.recent_events(Duration::from_secs(120)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, "fresh");
    }

    #[test]
    fn test_append_only_preserves_prior_records() {
        let (_dir, swarm) = swarm();
        swarm.emit_event("a", "t", "1").unwrap();
        swarm.emit_event("b", "t", "2").unwrap();
        let raw = fs::read_to_string(swarm.events_path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let (_dir, swarm) = swarm();
        swarm.emit_event("a", "t", "good").unwrap();
        let mut raw = fs::read_to_string(swarm.events_path()).unwrap();
        raw.push_str("not json at all\n");
        fs::write(swarm.events_path(), raw).unwrap();
        let events = swarm.recent_events(Duration::from_secs(60)).unwrap();
        assert_eq!(events.len(), 1);
    }
}
