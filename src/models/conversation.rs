use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;

pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum title length in characters before truncation.
const TITLE_MAX_CHARS: usize = 30;

/// A conversation and its messages. Message order is insertion order and is
/// never rearranged; the title is frozen once the first user message arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    pub updated_at: i64,
    /// Messages appended while this conversation was not the selected one.
    #[serde(default)]
    pub unread_count: u32,
    /// Unsent input preserved across conversation switches.
    #[serde(default)]
    pub draft: String,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            unread_count: 0,
            draft: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp();
    }

    /// Derive and freeze the title from the first user message.
    pub(crate) fn freeze_title_from(&mut self, content: &str) {
        self.title = derive_title(content);
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

fn derive_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let mut title: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
    if first_line.chars().count() > TITLE_MAX_CHARS {
        title.push('\u{2026}');
    }
    title
}
