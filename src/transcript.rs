//! # Transcript Reducer
//!
//! Folds the streamed transcript events of a call into an ordered list of
//! conversation turns.
//!
//! ## Merge Rule:
//! - Each role has at most one open *partial* turn.
//! - A delta extends the open partial turn of its role, or opens a new one.
//! - A done event replaces the open partial turn's text with the
//!   authoritative transcript and freezes it. It never appends a new turn.
//! - A final event (the user's own transcript) always appends a frozen turn.
//!
//! ## State Diagram (per role):
//! ```text
//! [no open turn] --delta--> [open partial] --delta--> [open partial]
//!       ^                         |
//!       +---------done------------+
//! ```
//!
//! The open turn is tracked by index rather than by "last turn", so a user
//! transcript that lands in the middle of an assistant response does not split
//! the response in two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptTurn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_partial: bool,
}

impl TranscriptTurn {
    fn new(role: Role, content: String, is_partial: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            is_partial,
        }
    }
}

#[derive(Debug, Default)]
pub struct TranscriptReducer {
    turns: Vec<TranscriptTurn>,
    /// Index into `turns` of the open partial turn, per role.
    open: HashMap<Role, usize>,
}

impl TranscriptReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append streamed text to the open partial turn of `role`.
    pub fn on_delta(&mut self, role: Role, text: &str) -> &TranscriptTurn {
        let index = match self.open.get(&role) {
            Some(&index) => {
                self.turns[index].content.push_str(text);
                index
            }
            None => {
                self.turns.push(TranscriptTurn::new(role, text.to_string(), true));
                let index = self.turns.len() - 1;
                self.open.insert(role, index);
                index
            }
        };
        &self.turns[index]
    }

    /// Freeze the open partial turn of `role` with its authoritative text.
    ///
    /// Returns `None` (and logs) when there is no open partial turn.
    pub fn on_done(&mut self, role: Role, full_text: &str) -> Option<&TranscriptTurn> {
        let Some(index) = self.open.remove(&role) else {
            warn!(role = role.as_str(), "transcript_done without an open partial turn, ignoring");
            return None;
        };

        let turn = &mut self.turns[index];
        turn.content = full_text.to_string();
        turn.is_partial = false;
        Some(&*turn)
    }

    /// Append a complete turn, independent of any open partial turn.
    pub fn on_final(&mut self, role: Role, full_text: &str) -> &TranscriptTurn {
        self.turns.push(TranscriptTurn::new(role, full_text.to_string(), false));
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    #[cfg(test)]
    pub fn has_partial(&self, role: Role) -> bool {
        self.open.contains_key(&role)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn reset(&mut self) {
        self.turns.clear();
        self.open.clear();
    }

    /// Move the finished transcript out, leaving the reducer empty.
    pub fn take(&mut self) -> Vec<TranscriptTurn> {
        self.open.clear();
        std::mem::take(&mut self.turns)
    }
}
