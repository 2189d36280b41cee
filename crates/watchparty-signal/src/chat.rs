//! Party chat.
//!
//! Chat messages share the room's message stream with signals; the
//! `isSignal` marker tells them apart. History is a bounded ring buffer
//! so memory stays predictable on long parties.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use watchparty_common::new_id;

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub identity: String,
    pub display_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a message from user input. Returns `None` for blank text.
    pub fn compose(identity: &str, display_name: &str, text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            id: new_id(),
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        })
    }
}

/// Recent messages of one room, oldest first.
#[derive(Debug)]
pub struct ChatHistory {
    limit: usize,
    messages: VecDeque<ChatMessage>,
}

impl ChatHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            messages: VecDeque::new(),
        }
    }

    /// Add a message, evicting the oldest when full. A message id seen
    /// before is ignored; returns whether the message was added.
    pub fn push(&mut self, msg: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        if self.messages.len() >= self.limit {
            self.messages.pop_front();
        }
        self.messages.push_back(msg);
        true
    }

    /// The most recent `limit` messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<&ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).collect()
    }

    pub fn all(&self) -> Vec<&ChatMessage> {
        self.messages.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new(100)
    }
}
