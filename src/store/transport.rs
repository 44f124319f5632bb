//! Network transport port for the conversation store.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ChatErrorBody, ChatReply, ChatRequestBody, HistoryItem};

/// Why a send failed, in terms the store can act on.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("request timed out")]
    TimedOut,
    #[error("server responded with status {status}")]
    Http { status: u16, message: Option<String> },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// One round trip to the chat proxy.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(
        &self,
        message: &str,
        history: &[HistoryItem],
    ) -> Result<ChatReply, TransportError>;
}

/// HTTP transport posting to the proxy's chat endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(
        &self,
        message: &str,
        history: &[HistoryItem],
    ) -> Result<ChatReply, TransportError> {
        let body = ChatRequestBody {
            message: message.to_string(),
            history: history.to_vec(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::TimedOut
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let hint = response
                .json::<ChatErrorBody>()
                .await
                .ok()
                .and_then(|b| b.retry_after_ms);
            return Err(TransportError::RateLimited {
                retry_after_ms: hint,
            });
        }

        if !status.is_success() {
            let message = response.json::<ChatErrorBody>().await.ok().map(|b| b.error);
            return Err(TransportError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<ChatReply>()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}
