//! Client-side conversation state.
//!
//! One [`ConversationStore`] instance backs one chat widget session. It owns
//! the message history, the loading/error flags, the rate-limit countdown,
//! and the persistence lifecycle; UI collaborators only call the three
//! commands and render [`snapshot`](ConversationStore::snapshot).
//!
//! Concurrency model: no concurrent sends per instance (a second send while
//! one is outstanding is rejected at the guard, not queued). The countdown
//! runs as an instance-owned task, cancelled when it reaches zero, on
//! `clear_history`, and on drop. State sits behind a mutex that is never
//! held across an await point.

pub mod persistence;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::sanitize::sanitize_text;
use crate::types::{HistoryItem, Message, Role, MAX_HISTORY_TURNS};

pub use persistence::{FileStorage, MemoryStorage, StorageBackend, HISTORY_KEY};
pub use transport::{ChatTransport, HttpTransport, TransportError};

/// Default network timeout for one send.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Countdown length when the server gives no retry hint.
pub const RATE_LIMIT_FALLBACK_SECS: u64 = 30;

/// At most this many follow-up suggestions are kept.
const MAX_SUGGESTIONS: usize = 3;

/// Read state exposed to the UI layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub is_rate_limited: bool,
    pub rate_limit_seconds_remaining: u64,
    pub suggestions: Vec<String>,
    pub failed_message: Option<String>,
}

/// Conversation state manager for the chat widget.
pub struct ConversationStore {
    state: Arc<Mutex<ConversationState>>,
    transport: Arc<dyn ChatTransport>,
    storage: Arc<dyn StorageBackend>,
    storage_key: String,
    request_timeout: Duration,
    /// At most one active countdown task at a time.
    countdown: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationStore {
    /// Create a store and hydrate it from persisted history.
    ///
    /// Storage failures and corrupt blobs are swallowed (the corrupt key is
    /// deleted); the widget starts empty in that case.
    pub async fn new(transport: Arc<dyn ChatTransport>, storage: Arc<dyn StorageBackend>) -> Self {
        let store = Self {
            state: Arc::new(Mutex::new(ConversationState::default())),
            transport,
            storage,
            storage_key: HISTORY_KEY.to_string(),
            request_timeout: REQUEST_TIMEOUT,
            countdown: Mutex::new(None),
        };

        if let Some(messages) = persistence::load_history(store.storage.as_ref(), &store.storage_key).await {
            debug!("restored {} persisted messages", messages.len());
            store.state.lock().messages = messages;
        }
        store
    }

    /// Override the per-send timeout (tests use a short one).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Current state, cloned for rendering.
    pub fn snapshot(&self) -> ConversationState {
        self.state.lock().clone()
    }

    /// Send a user message through the proxy and record the reply.
    ///
    /// No-op when the trimmed content is empty, a send is already in flight,
    /// or the rate-limit countdown is running. The user message is appended
    /// optimistically before any network I/O; the history snapshot sent to
    /// the proxy is captured *before* that append so the new message is not
    /// included twice.
    pub async fn send_message(&self, content: &str) {
        let content = sanitize_text(content);
        if content.is_empty() {
            return;
        }

        let history: Vec<HistoryItem> = {
            let mut state = self.state.lock();
            if state.is_loading || state.is_rate_limited {
                return;
            }
            state.failed_message = None;
            state.suggestions.clear();
            state.error = None;

            let start = state.messages.len().saturating_sub(MAX_HISTORY_TURNS);
            let history = state.messages[start..].iter().map(HistoryItem::from).collect();

            state.messages.push(Message::user(content.clone()));
            state.is_loading = true;
            history
        };
        self.persist().await;

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.transport.send(&content, &history),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut),
        };

        // Loading must clear on every exit path below.
        match result {
            Ok(mut reply) => {
                reply.suggestions.truncate(MAX_SUGGESTIONS);
                {
                    let mut state = self.state.lock();
                    state.is_loading = false;
                    state.messages.push(Message::assistant(reply.reply));
                    state.suggestions = reply.suggestions;
                }
                self.persist().await;
            }
            Err(TransportError::RateLimited { retry_after_ms }) => {
                let seconds = retry_after_ms
                    .map(|ms| ms.div_ceil(1000))
                    .unwrap_or(RATE_LIMIT_FALLBACK_SECS);
                {
                    let mut state = self.state.lock();
                    state.is_loading = false;
                    state.is_rate_limited = true;
                    state.rate_limit_seconds_remaining = seconds;
                    state.error = Some(rate_limit_message(seconds));
                    state.failed_message = Some(content);
                }
                self.start_countdown(seconds);
            }
            Err(TransportError::TimedOut) => {
                let mut state = self.state.lock();
                state.is_loading = false;
                state.error = Some("The request timed out. Please try again.".to_string());
                state.failed_message = Some(content);
            }
            Err(e) => {
                debug!("send failed: {e}");
                let mut state = self.state.lock();
                state.is_loading = false;
                state.error = Some(describe_failure(&e));
                state.failed_message = Some(content);
            }
        }
    }

    /// Re-send the last failed message.
    ///
    /// Removes the most recent user message whose content matches the failed
    /// one (reverse scan, so duplicate content is tolerated), then sends it
    /// again. No-op without a prior failure or while loading/rate-limited.
    pub async fn retry_last_message(&self) {
        let failed = {
            let mut state = self.state.lock();
            if state.is_loading || state.is_rate_limited {
                return;
            }
            let Some(failed) = state.failed_message.clone() else {
                return;
            };
            if let Some(pos) = state
                .messages
                .iter()
                .rposition(|m| m.role == Role::User && m.content == failed)
            {
                state.messages.remove(pos);
            }
            state.error = None;
            failed
        };
        self.persist().await;
        self.send_message(&failed).await;
    }

    /// Reset to the initial state and remove the persisted history.
    pub async fn clear_history(&self) {
        self.cancel_countdown();
        *self.state.lock() = ConversationState::default();
        if let Err(e) = self.storage.delete(&self.storage_key).await {
            debug!("failed to clear persisted history: {e}");
        }
    }

    /// Write the current messages back to storage. Skipped while empty so a
    /// cleared in-memory state never clobbers a blob that is still being
    /// reloaded elsewhere.
    async fn persist(&self) {
        let messages = self.state.lock().messages.clone();
        if messages.is_empty() {
            return;
        }
        persistence::save_history(self.storage.as_ref(), &self.storage_key, &messages).await;
    }

    /// Start the once-per-second countdown, replacing any running one.
    fn start_countdown(&self, seconds: u64) {
        let mut slot = self.countdown.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }

        let state = Arc::clone(&self.state);
        *slot = Some(tokio::spawn(async move {
            let mut remaining = seconds;
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                remaining = remaining.saturating_sub(1);
                let mut state = state.lock();
                state.rate_limit_seconds_remaining = remaining;
                if remaining == 0 {
                    // Rate-limit flag and error clear together.
                    state.is_rate_limited = false;
                    state.error = None;
                    break;
                }
                state.error = Some(rate_limit_message(remaining));
            }
        }));
    }

    fn cancel_countdown(&self) {
        if let Some(handle) = self.countdown.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ConversationStore {
    fn drop(&mut self) {
        self.cancel_countdown();
    }
}

fn rate_limit_message(seconds: u64) -> String {
    format!("Too many requests. Please wait {seconds}s before sending another message.")
}

fn describe_failure(error: &TransportError) -> String {
    match error {
        TransportError::Http {
            message: Some(message),
            ..
        } => message.clone(),
        TransportError::Http { status, .. } => {
            format!("The chat service returned an error ({status}). Please try again.")
        }
        TransportError::Malformed(_) => {
            "Received an unexpected reply from the chat service.".to_string()
        }
        _ => "Could not reach the chat service. Please try again.".to_string(),
    }
}
