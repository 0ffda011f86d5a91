//! In-process worker-id persistence (spec §6 "Persisted state", §9 Open
//! Question: memory-only for the lifetime of the host process).

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

fn store() -> &'static Mutex<HashMap<String, String>> {
    static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn sanitize(agent_id: &str) -> String {
    agent_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Returns the previously-persisted worker-id for this agent-id, if any.
pub fn recall(agent_id: &str) -> Option<String> {
    store().lock().unwrap().get(&sanitize(agent_id)).cloned()
}

/// Persists `worker_id` for future `Connect()` calls within this process
/// (testable property #6: worker-id stability across reconnects).
pub fn remember(agent_id: &str, worker_id: &str) {
    store()
        .lock()
        .unwrap()
        .insert(sanitize(agent_id), worker_id.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_within_process() {
        remember("agent:weird id!", "worker-123");
        assert_eq!(recall("agent:weird id!"), Some("worker-123".to_string()));
    }

    #[test]
    fn unknown_agent_returns_none() {
        assert_eq!(recall("never-seen-agent-xyz"), None);
    }
}
