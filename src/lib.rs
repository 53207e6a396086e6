//! Streaming chat client core.
//!
//! Decodes a chunked event-stream response into discrete content deltas and
//! feeds them into a persistent, multi-conversation store. The pipeline is
//! `LineReader` → `FrameParser` → delta accumulation → `ConversationStore`;
//! the `ChatController` wires the pipeline to the provider endpoint and owns
//! send, regenerate and cancellation orchestration.

pub mod config;
pub mod controllers;
pub mod logging;
pub mod models;
pub mod repositories;
pub mod services;
pub mod transport;

pub use config::ProviderConfig;
pub use controllers::{ChatController, SendHandle};
pub use models::{
    Attachment, AttachmentKind, CancelToken, Conversation, ConversationStore, Message,
    MessageStatus, NewMessage, Role, StoreError, StreamRegistry,
};
pub use repositories::{
    InMemoryStateRepository, JsonStateRepository, RepositoryError, StateRepository, StoreSnapshot,
};
pub use services::{ChatClient, ChatError, OutboundMessage, StreamChunk};
