use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::error::RepositoryResult;
use crate::models::Conversation;

/// The single durable record: all conversations plus the current selection.
/// Transient store fields (loading flags, pending attachments) never appear
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub state: StoreState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    pub conversations: Vec<Conversation>,
    pub current_conversation_id: Option<String>,
}

/// Durable storage for the conversation store.
///
/// `save` and `load` are synchronous by design: the store writes a snapshot
/// before every mutating operation returns, so any immediately-following read
/// observes the new state.
pub trait StateRepository: Send + Sync + 'static {
    fn load(&self) -> RepositoryResult<Option<StoreSnapshot>>;

    fn save(&self, snapshot: &StoreSnapshot) -> RepositoryResult<()>;

    /// Change notifications published when another process or tab rewrites
    /// the underlying storage. Subscribers reload the snapshot wholesale
    /// (last writer wins, no merge).
    fn subscribe(&self) -> broadcast::Receiver<()>;
}
