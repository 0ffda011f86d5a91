//! Per-turn cancellation tokens with group fan-out.
//!
//! Each response generation gets a `CancelToken`. Calling `cancel()` on it
//! signals the collector/TTS-consumer tasks to stop the current turn.
//!
//! **Groups** support cascading cancellation: a realtime session's provider
//! turn can register cascading pipeline sub-tasks (tool execution) as group
//! children, so cancelling the parent cancels them too.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token that can be checked by the response-generation loop.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active cancellation tokens per turn key, with group support for
/// cascading parent→child cancellation.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    /// group_key (parent turn) → set of child turn keys.
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()), groups: Mutex::new(HashMap::new()) }
    }

    /// Create and register a new cancel token for a turn.
    pub fn register(&self, turn_key: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(turn_key.to_owned(), token.clone());
        token
    }

    /// Cancel a running turn. Also cancels all children in the turn's
    /// cancel group. Returns true if a token was found.
    pub fn cancel(&self, turn_key: &str) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(turn_key) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(turn_key) {
            let tokens = self.tokens.lock();
            for child_key in children {
                if let Some(child_token) = tokens.get(child_key) {
                    child_token.cancel();
                }
            }
        }

        found
    }

    /// Remove the token for a turn (called when a turn completes).
    pub fn remove(&self, turn_key: &str) {
        self.tokens.lock().remove(turn_key);
        self.groups.lock().remove(turn_key);
    }

    /// Check if a turn has an active (running) response generation.
    pub fn is_running(&self, turn_key: &str) -> bool {
        self.tokens.lock().contains_key(turn_key)
    }

    pub fn add_to_group(&self, parent_key: &str, child_key: &str) {
        self.groups.lock().entry(parent_key.to_owned()).or_default().insert(child_key.to_owned());
    }

    pub fn remove_from_group(&self, parent_key: &str, child_key: &str) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent_key) {
            children.remove(child_key);
            if children.is_empty() {
                groups.remove(parent_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_map_register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("turn1");
        assert!(!token.is_cancelled());
        assert!(map.is_running("turn1"));

        assert!(map.cancel("turn1"));
        assert!(token.is_cancelled());

        map.remove("turn1");
        assert!(!map.is_running("turn1"));
        assert!(!map.cancel("turn1"));
    }

    #[test]
    fn cancel_cascades_to_children() {
        let map = CancelMap::new();
        let parent = map.register("parent");
        let child1 = map.register("child1");
        let child2 = map.register("child2");

        map.add_to_group("parent", "child1");
        map.add_to_group("parent", "child2");

        map.cancel("parent");
        assert!(parent.is_cancelled());
        assert!(child1.is_cancelled());
        assert!(child2.is_cancelled());
    }

    #[test]
    fn remove_from_group_cleanup() {
        let map = CancelMap::new();
        let _parent = map.register("p");
        let child = map.register("c");

        map.add_to_group("p", "c");
        map.remove_from_group("p", "c");

        map.cancel("p");
        assert!(!child.is_cancelled());
    }
}
