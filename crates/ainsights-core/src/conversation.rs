//! Bounded per-session conversation history.

use std::collections::VecDeque;

use crate::models::ConversationTurn;

/// Keeps the most recent `capacity` turns of one session, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ConversationWindow {
    capacity: usize,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a turn, evicting the oldest ones beyond capacity.
    pub fn push(&mut self, turn: ConversationTurn) {
        if self.capacity == 0 {
            return;
        }
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    /// The retained turns, oldest first.
    pub fn recent(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let mut w = ConversationWindow::new(2);
        w.push(ConversationTurn::new("q1", "a1"));
        w.push(ConversationTurn::new("q2", "a2"));
        w.push(ConversationTurn::new("q3", "a3"));
        let queries: Vec<String> = w.recent().into_iter().map(|t| t.query).collect();
        assert_eq!(queries, vec!["q2", "q3"]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut w = ConversationWindow::new(0);
        w.push(ConversationTurn::new("q", "a"));
        assert!(w.is_empty());
    }
}
