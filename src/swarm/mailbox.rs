//! Per-agent mailboxes. A message is one JSON file in the target's
//! `inbox/`, named by millisecond timestamp so directory order is delivery
//! order. Writes go through a temp file and rename, so a reader never
//! observes a partial message. Reading moves messages to `inbox/read/`:
//! at-least-once, no redelivery after archiving.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::id::{generate_message_id, now_ms};
use crate::swarm::{Swarm, SwarmError, SwarmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub sent_ms: u64,
    pub body: String,
}

/// Messaging seam. The directory layout is the wire format, but callers
/// go through this trait so a different transport can back it without
/// touching them.
pub trait MessageBus {
    fn send_message(&self, from: &str, to: &str, body: &str) -> SwarmResult<Message>;
    fn receive(&self, id: &str) -> SwarmResult<Vec<Message>>;
    fn unread_count(&self, id: &str) -> SwarmResult<usize>;
}

impl MessageBus for Swarm {
    fn send_message(&self, from: &str, to: &str, body: &str) -> SwarmResult<Message> {
        self.send(from, to, body)
    }

    fn receive(&self, id: &str) -> SwarmResult<Vec<Message>> {
        self.read_inbox(id)
    }

    fn unread_count(&self, id: &str) -> SwarmResult<usize> {
        self.inbox_len(id)
    }
}

impl Swarm {
    /// Send a message to `to`. The target must already be registered; the
    /// id is sanitized and the resolved inbox is containment-checked
    /// before anything touches disk.
    pub fn send(&self, from: &str, to: &str, body: &str) -> SwarmResult<Message> {
        let dir = self.agent_dir(to)?;
        let inbox = dir.join("inbox");
        if !inbox.is_dir() {
            return Err(SwarmError::UnknownAgent(to.to_string()));
        }
        let message = Message {
            id: generate_message_id(),
            from: from.to_string(),
            to: to.to_string(),
            sent_ms: now_ms(),
            body: body.to_string(),
        };
        let final_path = inbox.join(format!("{}.json", message.id));
        let tmp_path = inbox.join(format!(".{}.tmp", message.id));
        fs::write(&tmp_path, serde_json::to_string_pretty(&message)?)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(message)
    }

    /// Drain the inbox in filename (timestamp) order, archiving each
    /// message into `inbox/read/` as it is consumed. A message that fails
    /// to parse is archived too, so a corrupt file cannot wedge the inbox.
    pub fn read_inbox(&self, id: &str) -> SwarmResult<Vec<Message>> {
        let dir = self.agent_dir(id)?;
        let inbox = dir.join("inbox");
        if !inbox.is_dir() {
            return Err(SwarmError::UnknownAgent(id.to_string()));
        }
        let read_dir = inbox.join("read");
        fs::create_dir_all(&read_dir)?;

        let mut names: Vec<String> = fs::read_dir(&inbox)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".json"))
            .collect();
        names.sort();

        let mut messages = Vec::new();
        for name in names {
            let path = inbox.join(&name);
            if let Ok(text) = fs::read_to_string(&path) {
                if let Ok(message) = serde_json::from_str::<Message>(&text) {
                    messages.push(message);
                }
            }
            fs::rename(&path, read_dir.join(&name))?;
        }
        Ok(messages)
    }

    /// Unread message count, without consuming anything.
    pub fn inbox_len(&self, id: &str) -> SwarmResult<usize> {
        let inbox = self.agent_dir(id)?.join("inbox");
        if !inbox.is_dir() {
            return Err(SwarmError::UnknownAgent(id.to_string()));
        }
        Ok(fs::read_dir(&inbox)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
            .count())
    }
}
