//! Ordered per-room message list with dedup by id.

use std::collections::HashSet;

use crate::domain::{ChatMessage, MessageId};

/// Messages in arrival order; an id is stored at most once.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    seen: HashSet<MessageId>,
}

impl MessageLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` unless its id is already present. Returns `true`
    /// if it was appended.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Places `history` ahead of the live messages, skipping ids already
    /// present. Returns the number of history entries added.
    pub fn merge_history(&mut self, history: Vec<ChatMessage>) -> usize {
        let mut merged = Vec::with_capacity(history.len() + self.messages.len());
        for message in history {
            if self.seen.insert(message.id.clone()) {
                merged.push(message);
            }
        }
        let added = merged.len();
        merged.append(&mut self.messages);
        self.messages = merged;
        added
    }

    /// Returns `true` if a message with `id` is stored.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Stored messages in order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
