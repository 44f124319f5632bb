//! Shared validation and sanitization helpers.
//!
//! Pure functions with no side effects. Both the store and the proxy call
//! through here so the length clamp and control-character rules stay
//! identical on both sides of the wire.

use serde_json::Value;
use thiserror::Error;

use crate::types::{ChatRequestBody, HistoryItem, HistoryRole};

/// Hard cap on message length after sanitization.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Remove control characters that could corrupt logs or smuggle instructions
/// downstream. Newlines and tabs survive so multi-line replies re-sent as
/// history keep their shape.
pub fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub fn clamp_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

/// Trim, strip control characters, clamp to [`MAX_MESSAGE_CHARS`].
pub fn sanitize_text(input: &str) -> String {
    clamp_chars(strip_control_chars(input.trim()).trim(), MAX_MESSAGE_CHARS)
}

/// Why a request body was rejected before any backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestRejection {
    #[error("Request body must be a JSON object")]
    NotAnObject,
    #[error("Field 'message' is required and must be a string")]
    MessageNotString,
    #[error("Field 'history' must be an array")]
    HistoryNotArray,
    #[error("History entries must be objects with string 'role' and 'content'")]
    HistoryEntryShape,
    #[error("History role must be 'user' or 'model'")]
    HistoryRoleInvalid,
    #[error("Message cannot be empty")]
    EmptyMessage,
}

/// Structural type-guard for the chat request shape.
///
/// Returns the typed body or the reason it was rejected; performs no
/// sanitization beyond shape checking.
pub fn parse_chat_request(value: &Value) -> Result<ChatRequestBody, RequestRejection> {
    let obj = value.as_object().ok_or(RequestRejection::NotAnObject)?;

    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .ok_or(RequestRejection::MessageNotString)?;

    let mut history = Vec::new();
    if let Some(raw) = obj.get("history") {
        let entries = raw.as_array().ok_or(RequestRejection::HistoryNotArray)?;
        for entry in entries {
            let entry = entry.as_object().ok_or(RequestRejection::HistoryEntryShape)?;
            let role = entry
                .get("role")
                .and_then(Value::as_str)
                .ok_or(RequestRejection::HistoryEntryShape)?;
            let content = entry
                .get("content")
                .and_then(Value::as_str)
                .ok_or(RequestRejection::HistoryEntryShape)?;
            let role = match role {
                "user" => HistoryRole::User,
                "model" => HistoryRole::Model,
                _ => return Err(RequestRejection::HistoryRoleInvalid),
            };
            history.push(HistoryItem {
                role,
                content: content.to_string(),
            });
        }
    }

    Ok(ChatRequestBody {
        message: message.to_string(),
        history,
    })
}

/// True when `origin` is served from local development.
///
/// Prefix matching on the scheme+host boundary only. Suffix or substring
/// matching would misclassify a host like `evil-localhost.com`.
pub fn is_localhost_origin(origin: &str) -> bool {
    const LOCAL_HOSTS: [&str; 4] = [
        "http://localhost",
        "https://localhost",
        "http://127.0.0.1",
        "https://127.0.0.1",
    ];
    LOCAL_HOSTS
        .iter()
        .any(|base| origin == *base || origin.starts_with(&format!("{base}:")))
}

/// True when `origin` may be echoed back in CORS headers.
pub fn origin_allowed(origin: &str, allow_list: &[String]) -> bool {
    allow_list.iter().any(|allowed| allowed == origin) || is_localhost_origin(origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_control_characters_but_keeps_newlines() {
        let dirty = "hi\u{0}\u{7}there\nsecond\tline\u{7f}";
        assert_eq!(strip_control_chars(dirty), "hithere\nsecond\tline");
    }

    #[test]
    fn clamps_on_char_boundaries() {
        let s = "é".repeat(600);
        let clamped = clamp_chars(&s, MAX_MESSAGE_CHARS);
        assert_eq!(clamped.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn sanitize_trims_and_clamps() {
        let long = format!("  {}  ", "a".repeat(600));
        let clean = sanitize_text(&long);
        assert_eq!(clean.len(), MAX_MESSAGE_CHARS);
        assert!(!clean.starts_with(' '));
    }

    #[test]
    fn sanitize_of_whitespace_is_empty() {
        assert_eq!(sanitize_text("   \u{1}\t  "), "");
    }

    #[test]
    fn parse_accepts_minimal_request() {
        let body = parse_chat_request(&json!({"message": "hello"})).unwrap();
        assert_eq!(body.message, "hello");
        assert!(body.history.is_empty());
    }

    #[test]
    fn parse_accepts_history() {
        let body = parse_chat_request(&json!({
            "message": "hello",
            "history": [
                {"role": "user", "content": "hi"},
                {"role": "model", "content": "hello there"}
            ]
        }))
        .unwrap();
        assert_eq!(body.history.len(), 2);
        assert_eq!(body.history[1].role, HistoryRole::Model);
    }

    #[test]
    fn parse_rejects_bad_shapes() {
        assert_eq!(
            parse_chat_request(&json!("just a string")),
            Err(RequestRejection::NotAnObject)
        );
        assert_eq!(
            parse_chat_request(&json!({"message": 42})),
            Err(RequestRejection::MessageNotString)
        );
        assert_eq!(
            parse_chat_request(&json!({})),
            Err(RequestRejection::MessageNotString)
        );
        assert_eq!(
            parse_chat_request(&json!({"message": "x", "history": "nope"})),
            Err(RequestRejection::HistoryNotArray)
        );
        assert_eq!(
            parse_chat_request(&json!({"message": "x", "history": [{"role": "user"}]})),
            Err(RequestRejection::HistoryEntryShape)
        );
        assert_eq!(
            parse_chat_request(&json!({
                "message": "x",
                "history": [{"role": "assistant", "content": "y"}]
            })),
            Err(RequestRejection::HistoryRoleInvalid)
        );
    }

    #[test]
    fn localhost_matching_is_prefix_on_host_boundary() {
        assert!(is_localhost_origin("http://localhost"));
        assert!(is_localhost_origin("http://localhost:5173"));
        assert!(is_localhost_origin("http://127.0.0.1:3000"));
        assert!(!is_localhost_origin("https://evil-localhost.com"));
        assert!(!is_localhost_origin("https://localhost.evil.com"));
        assert!(!is_localhost_origin("http://notlocalhost:3000"));
    }

    #[test]
    fn origin_allowed_checks_exact_list_then_localhost() {
        let allowed = vec!["https://michaelsorrell.com".to_string()];
        assert!(origin_allowed("https://michaelsorrell.com", &allowed));
        assert!(origin_allowed("http://localhost:4321", &allowed));
        assert!(!origin_allowed("https://michaelsorrell.com.evil.net", &allowed));
        assert!(!origin_allowed("https://other.example", &allowed));
    }
}
