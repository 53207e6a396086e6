use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::conversation::Conversation;
use super::message::{Attachment, Message, MessageStatus, NewMessage, Role};
use crate::repositories::{RepositoryError, StateRepository, StoreSnapshot, StoreState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("conversation has no user message to regenerate from")]
    NoUserMessage,

    #[error("a response stream is already in flight for conversation {0}")]
    StreamInFlight(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] RepositoryError),
}

/// The authoritative model of all conversations and messages.
///
/// Constructed once at session start with an injected repository; every
/// mutating operation persists a snapshot synchronously before returning.
/// This is the single mutation entry point — nothing outside the store
/// touches a `Conversation` or `Message` directly.
pub struct ConversationStore {
    /// Newest-first by creation.
    conversations: Vec<Conversation>,
    current_id: Option<String>,
    /// Attachments staged for the next send; consumed into the user message.
    pending_attachments: Vec<Attachment>,
    /// message id → conversation id, so per-delta updates avoid scanning
    /// every conversation.
    message_index: HashMap<String, String>,
    // Transient UI flags, never persisted.
    is_loading: bool,
    assistant_typing: bool,
    repository: Arc<dyn StateRepository>,
}

impl ConversationStore {
    pub fn new(repository: Arc<dyn StateRepository>) -> Self {
        Self {
            conversations: Vec::new(),
            current_id: None,
            pending_attachments: Vec::new(),
            message_index: HashMap::new(),
            is_loading: false,
            assistant_typing: false,
            repository,
        }
    }

    /// Load the persisted snapshot into memory. Call once at startup.
    pub fn init(&mut self) -> Result<(), StoreError> {
        self.is_loading = true;
        let result = self.reload_from_storage();
        self.is_loading = false;
        result
    }

    /// Replace conversations and current id wholesale from storage.
    /// Last writer wins; no merge. Triggered externally when another
    /// process/tab reports a storage change.
    pub fn reload_from_storage(&mut self) -> Result<(), StoreError> {
        match self.repository.load()? {
            Some(snapshot) => {
                self.conversations = snapshot.state.conversations;
                self.current_id = snapshot.state.current_conversation_id;
            }
            None => {
                self.conversations = Vec::new();
                self.current_id = None;
            }
        }
        self.rebuild_index();
        debug!(
            conversations = self.conversations.len(),
            "store state reloaded from storage"
        );
        Ok(())
    }

    /// Create a conversation and select it. An existing empty conversation is
    /// reused instead of creating a duplicate, so at most one empty
    /// conversation exists at any time.
    pub fn create_conversation(&mut self) -> Result<String, StoreError> {
        if let Some(existing) = self.conversations.iter().find(|c| c.is_empty()) {
            let id = existing.id.clone();
            self.select_internal(&id);
            self.persist()?;
            return Ok(id);
        }

        let conversation = Conversation::new();
        let id = conversation.id.clone();
        self.conversations.insert(0, conversation);
        self.select_internal(&id);
        self.persist()?;
        Ok(id)
    }

    /// Select a conversation, atomically resetting its unread counter.
    pub fn set_current_conversation(&mut self, id: &str) -> Result<(), StoreError> {
        if !self.conversations.iter().any(|c| c.id == id) {
            return Err(StoreError::UnknownConversation(id.to_string()));
        }
        self.select_internal(id);
        self.persist()
    }

    pub fn delete_conversation(&mut self, id: &str) -> Result<(), StoreError> {
        let position = self
            .conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| StoreError::UnknownConversation(id.to_string()))?;

        let removed = self.conversations.remove(position);
        self.message_index
            .retain(|_, conv_id| conv_id != &removed.id);

        if self.current_id.as_deref() == Some(id) {
            // Fall back to the most recently created conversation, if any.
            // Selection goes through select_internal so the unread counter
            // resets with the selection.
            match self.conversations.first().map(|c| c.id.clone()) {
                Some(next) => self.select_internal(&next),
                None => self.current_id = None,
            }
        }
        self.persist()
    }

    /// The single insertion point for messages. Resolves the target as the
    /// explicit conversation, else the current one, else a freshly created
    /// one. Returns the generated message id.
    pub fn add_message(
        &mut self,
        new: NewMessage,
        target: Option<&str>,
    ) -> Result<String, StoreError> {
        let target_id = match target {
            Some(id) => {
                if !self.conversations.iter().any(|c| c.id == id) {
                    return Err(StoreError::UnknownConversation(id.to_string()));
                }
                id.to_string()
            }
            None => match self.current_id.clone() {
                Some(id) if self.conversations.iter().any(|c| c.id == id) => id,
                _ => self.create_conversation()?,
            },
        };

        let message = Message {
            id: Uuid::new_v4().to_string(),
            role: new.role,
            content: new.content,
            created_at: Utc::now().timestamp(),
            attachments: new.attachments,
            is_streaming: new.is_streaming,
            status: new.status,
        };
        let message_id = message.id.clone();

        let is_current = self.current_id.as_deref() == Some(target_id.as_str());
        let conversation = self
            .conversation_mut(&target_id)
            .ok_or_else(|| StoreError::UnknownConversation(target_id.clone()))?;

        if conversation.is_empty() && message.role == Role::User {
            conversation.freeze_title_from(&message.content);
        }
        conversation.messages.push(message);
        conversation.touch();
        if !is_current {
            conversation.unread_count += 1;
        }

        self.message_index.insert(message_id.clone(), target_id);
        self.persist()?;
        Ok(message_id)
    }

    /// Replace a message's content (and optionally status) in place. This is
    /// the per-delta hot path; the message is found through the id index, and
    /// order and count within the conversation never change.
    pub fn update_message(
        &mut self,
        id: &str,
        content: impl Into<String>,
        status: Option<MessageStatus>,
    ) -> Result<(), StoreError> {
        let message = self.message_mut(id)?;
        message.content = content.into();
        if let Some(next) = status {
            if message.status.can_advance_to(next) {
                message.status = next;
            } else {
                debug!(message_id = %id, from = ?message.status, to = ?next, "ignoring backward status transition");
            }
        }
        self.touch_owner(id);
        self.persist()
    }

    /// Advance a message's delivery status. Backward transitions are ignored.
    pub fn set_message_status(
        &mut self,
        id: &str,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let message = self.message_mut(id)?;
        if message.status.can_advance_to(status) {
            message.status = status;
        } else {
            debug!(message_id = %id, from = ?message.status, to = ?status, "ignoring backward status transition");
        }
        self.persist()
    }

    pub fn set_message_streaming(&mut self, id: &str, streaming: bool) -> Result<(), StoreError> {
        let message = self.message_mut(id)?;
        message.is_streaming = streaming;
        self.persist()
    }

    /// Remove a message from whichever conversation holds it (used when
    /// discarding a failed assistant placeholder before regenerating).
    pub fn delete_message(&mut self, id: &str) -> Result<(), StoreError> {
        let conv_id = self
            .message_index
            .remove(id)
            .ok_or_else(|| StoreError::UnknownMessage(id.to_string()))?;
        if let Some(conversation) = self.conversation_mut(&conv_id) {
            conversation.messages.retain(|m| m.id != id);
            conversation.touch();
        }
        self.persist()
    }

    /// Store unsent input for a conversation; overwritten on every keystroke.
    pub fn set_draft(&mut self, conversation_id: &str, text: impl Into<String>) -> Result<(), StoreError> {
        let conversation = self
            .conversation_mut(conversation_id)
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.to_string()))?;
        conversation.draft = text.into();
        self.persist()
    }

    // --- pending attachments (transient, not persisted) ---

    pub fn add_pending_attachment(&mut self, attachment: Attachment) {
        self.pending_attachments.push(attachment);
    }

    pub fn remove_pending_attachment(&mut self, id: &str) {
        self.pending_attachments.retain(|a| a.id != id);
    }

    /// Drain the staged attachments into the message being sent.
    pub fn take_pending_attachments(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.pending_attachments)
    }

    pub fn pending_attachments(&self) -> &[Attachment] {
        &self.pending_attachments
    }

    // --- transient UI flags ---

    pub fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn set_assistant_typing(&mut self, typing: bool) {
        self.assistant_typing = typing;
    }

    pub fn assistant_typing(&self) -> bool {
        self.assistant_typing
    }

    // --- selectors ---

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        let id = self.current_id.as_deref()?;
        self.conversation(id)
    }

    /// Messages of the current conversation. Returns the same empty slice
    /// when there is no selection, so callers comparing references do not see
    /// spurious changes.
    pub fn current_messages(&self) -> &[Message] {
        const EMPTY: &[Message] = &[];
        self.current_conversation()
            .map(|c| c.messages.as_slice())
            .unwrap_or(EMPTY)
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        let conv_id = self.message_index.get(id)?;
        self.conversation(conv_id)?.messages.iter().find(|m| m.id == id)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            state: StoreState {
                conversations: self.conversations.clone(),
                current_conversation_id: self.current_id.clone(),
            },
        }
    }

    pub fn repository(&self) -> Arc<dyn StateRepository> {
        self.repository.clone()
    }

    // --- internals ---

    fn select_internal(&mut self, id: &str) {
        self.current_id = Some(id.to_string());
        if let Some(conversation) = self.conversation_mut(id) {
            conversation.unread_count = 0;
        }
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    fn message_mut(&mut self, id: &str) -> Result<&mut Message, StoreError> {
        let conv_id = self
            .message_index
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownMessage(id.to_string()))?;
        self.conversations
            .iter_mut()
            .find(|c| c.id == conv_id)
            .and_then(|c| c.messages.iter_mut().find(|m| m.id == id))
            .ok_or_else(|| StoreError::UnknownMessage(id.to_string()))
    }

    fn touch_owner(&mut self, message_id: &str) {
        if let Some(conv_id) = self.message_index.get(message_id).cloned() {
            if let Some(conversation) = self.conversation_mut(&conv_id) {
                conversation.touch();
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.message_index.clear();
        for conversation in &self.conversations {
            for message in &conversation.messages {
                self.message_index
                    .insert(message.id.clone(), conversation.id.clone());
            }
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        self.repository.save(&self.snapshot())?;
        Ok(())
    }
}
