pub mod conversation;
pub mod message;
pub mod store;
pub mod stream_registry;

pub use conversation::{Conversation, DEFAULT_TITLE};
pub use message::{Attachment, AttachmentKind, Message, MessageStatus, NewMessage, Role};
pub use store::{ConversationStore, StoreError};
pub use stream_registry::{CancelToken, StreamRegistry};
