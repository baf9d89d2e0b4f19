//! In-memory conversation sessions.

use ainsights_core::conversation::ConversationWindow;
use ainsights_core::models::ConversationTurn;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Per-session bounded histories. Sessions never see each other's turns.
pub struct SessionStore {
    window: usize,
    sessions: Mutex<HashMap<String, ConversationWindow>>,
}

impl SessionStore {
    /// `window` is the number of turns each session keeps.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session and return its id (UUID v4).
    pub fn create(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .lock()
            .insert(id.clone(), ConversationWindow::new(self.window));
        id
    }

    /// The session's retained turns, oldest first. Unknown ids have none.
    pub fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|w| w.recent())
            .unwrap_or_default()
    }

    /// Append a turn, creating the session if it does not exist yet.
    pub fn record(&self, session_id: &str, turn: ConversationTurn) {
        let window = self.window;
        self.sessions
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationWindow::new(window))
            .push(turn);
    }

    /// Drop a session. Returns whether it existed.
    pub fn end(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::new(3);
        let a = store.create();
        let b = store.create();
        assert_ne!(a, b);

        store.record(&a, ConversationTurn::new("q-a", "ans-a"));
        assert_eq!(store.history(&a).len(), 1);
        assert!(store.history(&b).is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let store = SessionStore::new(2);
        let id = store.create();
        for i in 0..5 {
            store.record(&id, ConversationTurn::new(format!("q{}", i), "a"));
        }
        let queries: Vec<String> = store.history(&id).into_iter().map(|t| t.query).collect();
        assert_eq!(queries, vec!["q3", "q4"]);
    }

    #[test]
    fn test_unknown_and_ended_sessions() {
        let store = SessionStore::new(2);
        assert!(store.history("nope").is_empty());
        store.record("adhoc", ConversationTurn::new("q", "a"));
        assert_eq!(store.len(), 1);
        assert!(store.end("adhoc"));
        assert!(!store.end("adhoc"));
        assert!(store.is_empty());
    }
}
