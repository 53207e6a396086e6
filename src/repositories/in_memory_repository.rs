use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::error::RepositoryResult;
use super::state_repository::{StateRepository, StoreSnapshot};

/// In-memory repository for tests and development.
#[derive(Clone)]
pub struct InMemoryStateRepository {
    snapshot: Arc<Mutex<Option<StoreSnapshot>>>,
    changes: broadcast::Sender<()>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            snapshot: Arc::new(Mutex::new(None)),
            changes,
        }
    }

    /// Simulate another tab rewriting storage: replace the snapshot and
    /// publish a change notification.
    pub fn replace_and_notify(&self, snapshot: StoreSnapshot) {
        *self.snapshot.lock() = Some(snapshot);
        let _ = self.changes.send(());
    }

    pub fn stored(&self) -> Option<StoreSnapshot> {
        self.snapshot.lock().clone()
    }
}

impl Default for InMemoryStateRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRepository for InMemoryStateRepository {
    fn load(&self) -> RepositoryResult<Option<StoreSnapshot>> {
        Ok(self.snapshot.lock().clone())
    }

    fn save(&self, snapshot: &StoreSnapshot) -> RepositoryResult<()> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::state_repository::StoreState;

    #[test]
    fn test_save_and_load() {
        let repo = InMemoryStateRepository::new();
        assert!(repo.load().unwrap().is_none());

        let snapshot = StoreSnapshot {
            state: StoreState {
                conversations: Vec::new(),
                current_conversation_id: None,
            },
        };
        repo.save(&snapshot).unwrap();
        assert!(repo.load().unwrap().is_some());
    }

    #[test]
    fn test_replace_and_notify_publishes() {
        let repo = InMemoryStateRepository::new();
        let mut rx = repo.subscribe();
        repo.replace_and_notify(StoreSnapshot {
            state: StoreState {
                conversations: Vec::new(),
                current_conversation_id: None,
            },
        });
        assert!(rx.try_recv().is_ok());
    }
}
