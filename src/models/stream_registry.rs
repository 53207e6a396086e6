use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::store::StoreError;

/// Cooperative cancellation flag for one in-flight stream. Observed between
/// chunk applications; never interrupts mid-chunk. `cancelled()` lets a
/// reader loop race the wait for the next chunk against cancellation, so a
/// stalled provider does not delay the cancel.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
        // notify_one stores a permit when nobody is waiting yet, so a waiter
        // registering after this call still wakes.
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Resolves once cancellation has been requested. Resolves immediately
    /// when the token is already cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Per-conversation in-flight stream reservation.
///
/// A send must reserve its conversation's slot before streaming begins and
/// release it on every exit path (completion, error, cancellation). A second
/// send into a conversation with an active stream is rejected, which closes
/// the window where two reader loops would race on the same message.
#[derive(Default)]
pub struct StreamRegistry {
    active: Mutex<HashMap<String, CancelToken>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the stream slot for a conversation. Fails with
    /// `StreamInFlight` when a stream is already active.
    pub fn begin(&self, conversation_id: &str) -> Result<CancelToken, StoreError> {
        let mut active = self.active.lock();
        if active.contains_key(conversation_id) {
            return Err(StoreError::StreamInFlight(conversation_id.to_string()));
        }
        let token = CancelToken::new();
        active.insert(conversation_id.to_string(), token.clone());
        debug!(conv_id = %conversation_id, "stream slot reserved");
        Ok(token)
    }

    /// Release the reservation. Idempotent.
    pub fn finish(&self, conversation_id: &str) {
        if self.active.lock().remove(conversation_id).is_some() {
            debug!(conv_id = %conversation_id, "stream slot released");
        }
    }

    /// Trigger cancellation of an active stream. The reader loop observes the
    /// token at its next suspension point. Returns false when no stream is
    /// active for the conversation.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.active.lock().get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active stream (session shutdown).
    pub fn cancel_all(&self) {
        for token in self.active.lock().values() {
            token.cancel();
        }
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.active.lock().contains_key(conversation_id)
    }
}
