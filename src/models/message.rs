use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// A file or image attached to a message. Produced by the external ingestion
/// collaborator (already base64-encoded) and immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub kind: AttachmentKind,
    pub name: String,
    /// Display-time reference.
    pub url: String,
    /// Inline base64 payload, when the file was small enough to embed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Delivery state of a message. Transitions only move forward:
/// `Sending → Sent → Delivered → Read`, with `Failed` terminal from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => 4,
        }
    }

    /// Whether a transition to `next` is allowed. Re-asserting the current
    /// status is a permitted no-op; nothing leaves `Failed`.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        if self == MessageStatus::Failed {
            return next == MessageStatus::Failed;
        }
        next.rank() >= self.rank()
    }
}

/// A single message inside a conversation. Created only through
/// `ConversationStore::add_message` and mutated only through store operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// Cumulative text; append-only while `is_streaming` is true.
    pub content: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    pub is_streaming: bool,
    pub status: MessageStatus,
}

/// Message fields supplied by callers of `add_message`; the store generates
/// the id and timestamp itself.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub attachments: Option<Vec<Attachment>>,
    pub is_streaming: bool,
    pub status: MessageStatus,
}

impl NewMessage {
    pub fn user(content: impl Into<String>, attachments: Option<Vec<Attachment>>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            attachments,
            is_streaming: false,
            status: MessageStatus::Sending,
        }
    }

    /// Empty assistant message that the stream will fill in.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            attachments: None,
            is_streaming: true,
            status: MessageStatus::Sending,
        }
    }
}
