//! Message and wire types shared by the conversation store and the proxy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How many prior turns travel with each request. Both sides enforce this:
/// the store truncates at send time, the proxy truncates again on receipt.
pub const MAX_HISTORY_TURNS: usize = 10;

/// Who authored a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single conversation turn as the store owns it.
///
/// Immutable once created, except for removal during retry. Insertion order
/// is the canonical conversation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Wire-protocol role. The backend API calls the assistant side `model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "model")]
    Model,
}

impl HistoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryRole::User => "user",
            HistoryRole::Model => "model",
        }
    }
}

/// A prior turn in the wire format sent to the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub role: HistoryRole,
    pub content: String,
}

impl From<&Message> for HistoryItem {
    fn from(message: &Message) -> Self {
        HistoryItem {
            role: match message.role {
                Role::User => HistoryRole::User,
                Role::Assistant => HistoryRole::Model,
            },
            content: message.content.clone(),
        }
    }
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequestBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryItem>,
}

/// Success envelope returned by the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Error envelope returned by the proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_models: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_item_maps_assistant_to_model_role() {
        let item = HistoryItem::from(&Message::assistant("hello"));
        assert_eq!(item.role, HistoryRole::Model);
        assert_eq!(serde_json::to_value(&item).unwrap()["role"], "model");

        let item = HistoryItem::from(&Message::user("hi"));
        assert_eq!(serde_json::to_value(&item).unwrap()["role"], "user");
    }

    #[test]
    fn message_ids_are_unique() {
        let a = Message::user("same");
        let b = Message::user("same");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn error_body_omits_absent_hints() {
        let body = ChatErrorBody {
            error: "nope".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("retryAfterMs").is_none());
        assert!(json.get("attemptedModels").is_none());
    }
}
