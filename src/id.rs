//! ID generation and sanitization utilities for Drover
//!
//! Agent ids double as filesystem path components under the swarm root, so
//! sanitization is fail-closed: anything outside alphanumeric, underscore
//! and hyphen is rejected rather than stripped.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique run ID
///
/// Format: `{timestamp_ms}-{random_hex}`
/// Example: `1738300800123-a1b2`
pub fn generate_run_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::thread_rng().gen();
    format!("{}-{:04x}", timestamp, random)
}

/// Generate an event ID
///
/// Format: `evt-{timestamp_ms}-{random_hex}`
pub fn generate_event_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::thread_rng().gen();
    format!("evt-{}-{:04x}", timestamp, random)
}

/// Generate a mailbox message ID; lexicographic order tracks send time.
///
/// Format: `{timestamp_ms}-{random_hex}`
pub fn generate_message_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::thread_rng().gen();
    format!("{}-{:04x}", timestamp, random)
}

/// Derive a short agent id from a role: sanitized role plus a time suffix.
///
/// Example: role "builder" at t=...45123 -> "builder-45123"
pub fn derive_agent_id(role: &str) -> String {
    let slug: String = role
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    let suffix = now_ms() % 100_000;
    format!("{}-{:05}", slug, suffix)
}

/// Check whether an id is safe to use as a path component.
///
/// Only ASCII alphanumerics, underscore and hyphen are allowed. Empty ids
/// are rejected. This is the whole defense against path traversal, so it
/// rejects rather than normalizes.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
