//! Per-call conversation history

use outdial_core::{Message, Role};

/// Message history for one call.
///
/// Holds the turns sent to the language model plus a bounded tail of agent
/// utterances used by repetition detection.
pub struct ConversationHistory {
    turns: Vec<Message>,
    /// Agent utterances, newest last, bounded to `window`
    recent_agent: Vec<String>,
    window: usize,
}

impl ConversationHistory {
    pub fn new(window: usize) -> Self {
        Self {
            turns: Vec::new(),
            recent_agent: Vec::new(),
            window,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Message::user(text));
    }

    pub fn push_agent(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.recent_agent.push(text.clone());
        while self.recent_agent.len() > self.window {
            self.recent_agent.remove(0);
        }
        self.turns.push(Message::assistant(text));
    }

    /// Turns for the next generation request (system prompt added by the client)
    pub fn turns(&self) -> Vec<Message> {
        self.turns.clone()
    }

    /// Recent agent utterances, oldest first
    pub fn recent_agent_utterances(&self) -> &[String] {
        &self.recent_agent
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// The last user turn, if any
    pub fn last_user(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_accumulation() {
        let mut history = ConversationHistory::new(4);
        history.push_user("hi");
        history.push_agent("hello, how can I help?");
        history.push_user("what time is it");

        assert_eq!(history.turn_count(), 3);
        assert_eq!(history.last_user(), Some("what time is it"));
    }

    #[test]
    fn test_recent_agent_window_is_bounded() {
        let mut history = ConversationHistory::new(2);
        history.push_agent("one");
        history.push_agent("two");
        history.push_agent("three");

        assert_eq!(history.recent_agent_utterances(), &["two", "three"]);
        // Full turn history is not truncated
        assert_eq!(history.turn_count(), 3);
    }
}
