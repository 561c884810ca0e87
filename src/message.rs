//! Conversation state held by the chat view
//!
//! The conversation lives only in memory. Messages are appended in
//! chronological order; the single pending placeholder is the only message
//! ever rewritten in place.

use serde::Serialize;

/// Who a message is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
    Error,
    /// Placeholder for a reply that is still arriving
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
}

impl Message {
    pub fn new(text: impl Into<String>, sender: Sender) -> Self {
        Self {
            text: text.into(),
            sender,
        }
    }
}

/// A turn forwarded to `/api/chat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::new(text, Sender::User));
    }

    /// Append an empty placeholder and return its position
    pub fn begin_pending(&mut self) -> usize {
        self.messages.push(Message::new(String::new(), Sender::Pending));
        self.messages.len() - 1
    }

    fn pending_mut(&mut self, idx: usize) -> Option<&mut Message> {
        self.messages
            .get_mut(idx)
            .filter(|m| m.sender == Sender::Pending)
    }

    pub fn update_pending(&mut self, idx: usize, text: &str) {
        if let Some(msg) = self.pending_mut(idx) {
            msg.text.clear();
            msg.text.push_str(text);
        }
    }

    /// Swap in the notice only while nothing has been received yet
    pub fn mark_still_working(&mut self, idx: usize, notice: &str) -> bool {
        match self.pending_mut(idx) {
            Some(msg) if msg.text.is_empty() => {
                msg.text = notice.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self, idx: usize, text: String) {
        if let Some(msg) = self.pending_mut(idx) {
            msg.text = text;
            msg.sender = Sender::Assistant;
        }
    }

    pub fn fail(&mut self, idx: usize, reason: &str) {
        if let Some(msg) = self.pending_mut(idx) {
            msg.text = format!("ERROR: {}", reason);
            msg.sender = Sender::Error;
        }
    }

    /// User and assistant turns in order, errors and placeholders excluded
    pub fn history(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .filter_map(|m| match m.sender {
                Sender::User => Some(ChatTurn::user(m.text.clone())),
                Sender::Assistant => Some(ChatTurn::assistant(m.text.clone())),
                Sender::Error | Sender::Pending => None,
            })
            .collect()
    }
}
