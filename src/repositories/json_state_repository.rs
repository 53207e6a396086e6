use std::path::PathBuf;

use tokio::sync::broadcast;

use super::error::{RepositoryError, RepositoryResult};
use super::state_repository::{StateRepository, StoreSnapshot};

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// JSON file-backed repository. The whole store state lives under a single
/// file in the user config directory; writes are atomic (temp file + rename).
pub struct JsonStateRepository {
    path: PathBuf,
    changes: broadcast::Sender<()>,
}

impl JsonStateRepository {
    pub fn new() -> RepositoryResult<Self> {
        let path = dirs::config_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Could not determine config directory".to_string(),
            })?
            .join("chatflow")
            .join("state.json");
        Ok(Self::with_path(path))
    }

    /// Repository rooted at an explicit file path (used by tests).
    pub fn with_path(path: PathBuf) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { path, changes }
    }

    /// Called by the external storage watcher when another process rewrote
    /// the state file. Publishes a reload notification to subscribers.
    pub fn notify_external_change(&self) {
        let _ = self.changes.send(());
    }
}

impl StateRepository for JsonStateRepository {
    fn load(&self) -> RepositoryResult<Option<StoreSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let snapshot = serde_json::from_str(&content)?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &StoreSnapshot) -> RepositoryResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(snapshot)?;

        // Write to temp, then rename, so readers never observe a torn file.
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;
    use crate::repositories::state_repository::StoreState;

    fn snapshot_with_one_conversation() -> StoreSnapshot {
        let conversation = Conversation::new();
        let id = conversation.id.clone();
        StoreSnapshot {
            state: StoreState {
                conversations: vec![conversation],
                current_conversation_id: Some(id),
            },
        }
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonStateRepository::with_path(dir.path().join("state.json"));
        assert!(repo.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonStateRepository::with_path(dir.path().join("state.json"));

        let snapshot = snapshot_with_one_conversation();
        repo.save(&snapshot).unwrap();

        let loaded = repo.load().unwrap().unwrap();
        assert_eq!(loaded.state.conversations.len(), 1);
        assert_eq!(
            loaded.state.current_conversation_id,
            snapshot.state.current_conversation_id
        );
    }

    #[test]
    fn test_persisted_record_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let repo = JsonStateRepository::with_path(path.clone());
        repo.save(&snapshot_with_one_conversation()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["state"]["conversations"].is_array());
        assert!(raw["state"]["currentConversationId"].is_string());
    }

    #[test]
    fn test_external_change_notifies_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonStateRepository::with_path(dir.path().join("state.json"));
        let mut rx = repo.subscribe();
        repo.notify_external_change();
        assert!(rx.try_recv().is_ok());
    }
}
