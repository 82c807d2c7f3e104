//! Conversation transcript and the reconciler operations that splice
//! streamed text into it.
//!
//! Messages are only ever appended at the tail or truncated from it; nothing
//! in here reorders or removes an interior message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Marker that serializes as the literal `"text"` part type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum TextKind {
    #[serde(rename = "text")]
    Text,
}

/// A text part: `{"type":"text","text":"..."}`.
///
/// Other keys on the part (`state`, `providerMetadata`, ...) are kept in
/// `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    #[serde(rename = "type")]
    kind: TextKind,
    pub text: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One piece of message content.
///
/// Only text parts are ever created or edited here. Parts of any other kind
/// are carried through untouched as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text(TextPart),
    Opaque(serde_json::Value),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(TextPart { kind: TextKind::Text, text: text.into(), extra: serde_json::Map::new() })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(p) => Some(&p.text),
            Part::Opaque(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self { id: id.into(), role, parts: vec![Part::text(text)] }
    }

    /// All text parts joined in order.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    /// Replace the content of the first text part, adding one if there is none.
    fn set_text(&mut self, text: &str) {
        let existing = self.parts.iter_mut().find_map(|p| match p {
            Part::Text(t) => Some(t),
            Part::Opaque(_) => None,
        });
        match existing {
            Some(part) => {
                part.text.clear();
                part.text.push_str(text);
            }
            None => self.parts.push(Part::text(text)),
        }
    }
}

/// Reconciler failures. Both leave the transcript untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("message '{0}' not found")]
    NotFound(String),
    /// A follow-up accumulation named a live message that is not there.
    #[error("live message '{0}' missing from transcript")]
    MissingLiveMessage(String),
}

/// Ordered list of messages; insertion order is conversation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
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

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Append a message submitted directly by the user.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Most recent user message, if any.
    pub fn last_user(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Drop every message after `message_id`, keeping it and all before it.
    ///
    /// Returns how many messages were removed.
    pub fn truncate_after(&mut self, message_id: &str) -> Result<usize, TranscriptError> {
        let idx = self
            .position(message_id)
            .ok_or_else(|| TranscriptError::NotFound(message_id.to_string()))?;
        let removed = self.messages.len() - (idx + 1);
        self.messages.truncate(idx + 1);
        Ok(removed)
    }

    /// Splice accumulated text into the transcript.
    ///
    /// The first accumulation of an attempt appends a new message; every later
    /// one replaces that message's text. A first call whose id is already
    /// present is treated as a replace so ids stay unique.
    pub fn apply_accumulation(
        &mut self,
        live_message_id: &str,
        role: Role,
        text: &str,
        is_first: bool,
    ) -> Result<(), TranscriptError> {
        match self.messages.iter_mut().find(|m| m.id == live_message_id) {
            Some(message) => {
                message.set_text(text);
                Ok(())
            }
            None if is_first => {
                self.messages.push(Message::new(live_message_id, role, text));
                Ok(())
            }
            None => Err(TranscriptError::MissingLiveMessage(live_message_id.to_string())),
        }
    }
}
