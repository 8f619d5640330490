use std::collections::HashSet;

use uuid::Uuid;

use quest_types::Message;

/// The transcript of one quest, fed by the initial fetch, realtime inserts and
/// local send echoes. Append-only; an id is never stored twice.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a freshly fetched, server-ordered transcript.
    pub fn initialize(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.ids.clear();
        for message in messages {
            self.insert(message);
        }
    }

    /// Append unless a message with the same id is already present.
    /// Returns whether anything changed.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }

    pub fn suggestions(&self) -> &[String] {
        current_suggestions(&self.messages)
    }
}

/// Follow-ups on offer: whatever the newest message carries. An assistant
/// turn followed by anything else offers none.
pub fn current_suggestions(messages: &[Message]) -> &[String] {
    messages.last().map(|m| m.suggestions()).unwrap_or(&[])
}
