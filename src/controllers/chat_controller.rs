use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::Stream;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::models::{
    CancelToken, ConversationStore, MessageStatus, NewMessage, Role, StoreError, StreamRegistry,
};
use crate::services::chat_service::{
    ChatClient, ChatError, OutboundMessage, ResponseStream, StreamChunk, response_stream,
};
use crate::transport::DeltaAccumulator;

/// Content substituted into a placeholder that was cancelled before any
/// delta arrived.
const CANCELLED_NOTICE: &str = "Response cancelled.";

const ERROR_CHANNEL_CAPACITY: usize = 32;

/// Everything needed to drive one exchange: the reserved conversation, the
/// message ids created for it, the outbound history snapshot and the
/// cancellation token. Dropping the handle without dispatching leaves the
/// placeholder in place; `abort_send` fails it explicitly.
#[derive(Clone)]
pub struct SendHandle {
    pub conversation_id: String,
    /// Absent when regenerating (no new user message is created).
    pub user_message_id: Option<String>,
    pub assistant_message_id: String,
    pub history: Vec<OutboundMessage>,
    pub cancel: CancelToken,
}

/// Orchestrates sends, regeneration and cancellation against the store.
///
/// Constructed once at session start with the store and provider client
/// injected. Errors from the provider never propagate out of a send; they
/// become a single store mutation on the failed message and a notification on
/// the error channel.
pub struct ChatController {
    store: Arc<Mutex<ConversationStore>>,
    client: ChatClient,
    streams: StreamRegistry,
    errors: broadcast::Sender<String>,
}

impl ChatController {
    pub fn new(store: Arc<Mutex<ConversationStore>>, client: ChatClient) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            store,
            client,
            streams: StreamRegistry::new(),
            errors,
        }
    }

    /// Load persisted state. Call once before the first operation.
    pub fn init(&self) -> Result<(), StoreError> {
        self.store.lock().init()
    }

    /// Cancel all in-flight streams (session shutdown).
    pub fn dispose(&self) {
        self.streams.cancel_all();
    }

    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        self.store.clone()
    }

    /// Observe provider errors without coupling to the store; the failed
    /// message itself carries the user-facing string.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    /// Send user input through the full pipeline: reserve the stream slot,
    /// append the user message and assistant placeholder, dispatch, and feed
    /// every delta back into the store. Provider failures are absorbed into
    /// the placeholder; only store-consistency errors surface here.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<SendHandle, StoreError> {
        let handle = self.begin_send(text)?;
        self.dispatch(&handle).await;
        Ok(handle)
    }

    /// Re-request the assistant's reply to the most recent user message,
    /// discarding a trailing assistant message first.
    pub async fn regenerate_last_response(&self) -> Result<SendHandle, StoreError> {
        let handle = self.begin_regenerate()?;
        self.dispatch(&handle).await;
        Ok(handle)
    }

    /// Stage an exchange without touching the network: mutate the store and
    /// reserve the conversation's stream slot.
    pub fn begin_send(&self, text: impl Into<String>) -> Result<SendHandle, StoreError> {
        let text = text.into();
        let mut store = self.store.lock();

        let conversation_id = match store.current_id() {
            Some(id) => id.to_string(),
            None => store.create_conversation()?,
        };
        let cancel = self.streams.begin(&conversation_id)?;

        let staged = store.take_pending_attachments();
        let attachments = if staged.is_empty() { None } else { Some(staged) };

        let result = (|| {
            let user_message_id = store.add_message(
                NewMessage::user(text.clone(), attachments.clone()),
                Some(&conversation_id),
            )?;
            let assistant_message_id =
                store.add_message(NewMessage::assistant_placeholder(), Some(&conversation_id))?;
            store.set_assistant_typing(true);

            let conversation = store
                .conversation(&conversation_id)
                .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))?;
            let history: Vec<OutboundMessage> = conversation
                .messages
                .iter()
                .filter(|m| m.id != assistant_message_id)
                .map(OutboundMessage::from_message)
                .collect();

            Ok(SendHandle {
                conversation_id: conversation_id.clone(),
                user_message_id: Some(user_message_id),
                assistant_message_id,
                history,
                cancel: cancel.clone(),
            })
        })();

        if result.is_err() {
            self.streams.finish(&conversation_id);
        }
        result
    }

    /// Stage a regeneration: locate the most recent user message, drop a
    /// trailing assistant reply, and create a fresh placeholder exactly as
    /// the send path does.
    pub fn begin_regenerate(&self) -> Result<SendHandle, StoreError> {
        let mut store = self.store.lock();

        let conversation_id = store
            .current_id()
            .map(str::to_string)
            .ok_or(StoreError::NoUserMessage)?;
        let conversation = store
            .conversation(&conversation_id)
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))?;
        let user_index = conversation
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or(StoreError::NoUserMessage)?;
        let trailing_assistant = conversation
            .messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.id.clone());

        let cancel = self.streams.begin(&conversation_id)?;

        let result = (|| {
            if let Some(id) = &trailing_assistant {
                store.delete_message(id)?;
            }

            let conversation = store
                .conversation(&conversation_id)
                .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))?;
            let history =
                OutboundMessage::from_history(&conversation.messages[..=user_index]);

            let assistant_message_id =
                store.add_message(NewMessage::assistant_placeholder(), Some(&conversation_id))?;
            store.set_assistant_typing(true);

            Ok(SendHandle {
                conversation_id: conversation_id.clone(),
                user_message_id: None,
                assistant_message_id,
                history,
                cancel: cancel.clone(),
            })
        })();

        if result.is_err() {
            self.streams.finish(&conversation_id);
        }
        result
    }

    /// Drive a staged exchange against the real provider endpoint.
    async fn dispatch(&self, handle: &SendHandle) {
        match self.client.stream_completion(handle.history.clone()).await {
            Ok(stream) => {
                self.mark_dispatched(handle);
                self.consume(handle, stream).await;
            }
            Err(err) => self.apply_failure(handle, err),
        }
        self.streams.finish(&handle.conversation_id);
    }

    /// Feed a raw byte stream into a staged exchange. This is the same pump
    /// `send_message` uses once the response arrives; tests drive it with
    /// hand-split chunks.
    pub async fn stream_response_into<S>(&self, handle: &SendHandle, bytes: S)
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        self.mark_dispatched(handle);
        self.consume(handle, response_stream(bytes)).await;
        self.streams.finish(&handle.conversation_id);
    }

    /// Fail a staged exchange before any streaming happened (e.g. the
    /// provider rejected the request). Converts the error into the single
    /// store mutation and releases the reservation; never raises.
    pub fn abort_send(&self, handle: &SendHandle, err: ChatError) {
        self.apply_failure(handle, err);
        self.streams.finish(&handle.conversation_id);
    }

    /// Request cancellation of the conversation's active stream. The reader
    /// loop observes the token at its next chunk boundary.
    pub fn cancel_stream(&self, conversation_id: &str) -> bool {
        self.streams.cancel(conversation_id)
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.streams.is_streaming(conversation_id)
    }

    /// Background task applying cross-tab synchronization: every change
    /// notification from the repository triggers a wholesale reload.
    pub fn spawn_sync_task(&self) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let mut changes = self.store.lock().repository().subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Err(err) = store.lock().reload_from_storage() {
                            warn!(error = %err, "failed to reload state after external change");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn mark_dispatched(&self, handle: &SendHandle) {
        let mut store = self.store.lock();
        if let Some(user_id) = &handle.user_message_id {
            log_store_error(store.set_message_status(user_id, MessageStatus::Sent));
        }
        log_store_error(store.set_message_status(&handle.assistant_message_id, MessageStatus::Sent));
    }

    /// Apply the decoded stream to the placeholder. Each chunk is processed
    /// atomically with respect to other store operations; deltas land in
    /// arrival order.
    async fn consume(&self, handle: &SendHandle, mut stream: ResponseStream) {
        let message_id = handle.assistant_message_id.as_str();
        let mut accumulator = DeltaAccumulator::new();

        loop {
            // Race the next chunk against cancellation, so a stalled provider
            // cannot delay a cancel until its next flush.
            let item = tokio::select! {
                item = stream.next() => item,
                () = handle.cancel.cancelled() => {
                    debug!(conv_id = %handle.conversation_id, "stream cancelled");
                    break;
                }
            };
            let Some(item) = item else { break };
            match item {
                Ok(StreamChunk::Delta(delta)) => {
                    let update = accumulator.push(&delta);
                    let mut store = self.store.lock();
                    if update.first_token {
                        store.set_assistant_typing(false);
                        log_store_error(
                            store.set_message_status(message_id, MessageStatus::Delivered),
                        );
                    }
                    log_store_error(store.update_message(message_id, update.content, None));
                }
                Ok(StreamChunk::Done) => break,
                Err(err) => {
                    self.apply_failure(handle, err);
                    return;
                }
            }
        }
        // Dropping the stream here releases the underlying connection on
        // every exit path, including cancellation.
        drop(stream);

        let cancelled = handle.cancel.is_cancelled();
        let mut store = self.store.lock();
        store.set_assistant_typing(false);
        if cancelled && accumulator.content().is_empty() {
            log_store_error(store.update_message(
                message_id,
                CANCELLED_NOTICE,
                Some(MessageStatus::Failed),
            ));
        } else {
            log_store_error(store.set_message_status(message_id, MessageStatus::Read));
        }
        log_store_error(store.set_message_streaming(message_id, false));
    }

    /// One failure, one store mutation: the placeholder takes the user-facing
    /// string, its status short-circuits to the error-terminal state, and the
    /// streaming flag is forced off. The conversation stays consistent.
    fn apply_failure(&self, handle: &SendHandle, err: ChatError) {
        error!(error = %err, conv_id = %handle.conversation_id, "chat request failed");
        {
            let mut store = self.store.lock();
            store.set_assistant_typing(false);
            log_store_error(store.update_message(
                &handle.assistant_message_id,
                err.user_facing_message(),
                Some(MessageStatus::Failed),
            ));
            log_store_error(store.set_message_streaming(&handle.assistant_message_id, false));
        }
        let _ = self.errors.send(err.to_string());
    }
}

fn log_store_error(result: Result<(), StoreError>) {
    if let Err(err) = result {
        warn!(error = %err, "store mutation failed during streaming");
    }
}
