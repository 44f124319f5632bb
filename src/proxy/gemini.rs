//! Gemini generateContent client and per-attempt outcome classification.
//!
//! The fallback chain only needs one question answered per attempt: reply,
//! safety block, or which way did it fail. [`classify`] answers that from a
//! status code and raw body with no I/O, so the decision table is testable
//! without a network; [`GeminiClient`] does the actual HTTP round trip.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::HistoryItem;

/// Per-attempt timeout. A slow model falls through to the next one instead
/// of keeping the caller waiting for the full request.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(20);

/// Hard cap on generated reply length, in tokens.
const MAX_OUTPUT_TOKENS: u32 = 500;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// One turn of the upstream conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self::turn("user", text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::turn("model", text)
    }

    fn turn(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }
}

impl From<&HistoryItem> for Content {
    fn from(item: &HistoryItem) -> Self {
        Self::turn(item.role.as_str(), item.content.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

/// Request body for `models/{model}:generateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
}

impl GenerateRequest {
    /// Wrap an assembled conversation with the fixed generation parameters
    /// and safety thresholds used for every attempt.
    pub fn new(contents: Vec<Content>) -> Self {
        const CATEGORIES: [&str; 4] = [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ];
        Self {
            contents,
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 0.95,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
            safety_settings: CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// What a single model attempt produced, in terms the chain can act on.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Non-empty reply text; the chain stops here.
    Reply(String),
    /// The model withheld output on content-policy grounds. Not a failure;
    /// the caller answers with a fixed refusal.
    SafetyBlocked,
    /// Quota exhausted on this model; another model may have its own.
    RateLimited { retry_after_ms: Option<u64> },
    /// Credential rejected. Retrying other models with the same key is
    /// pointless; the chain aborts.
    AuthFailed,
    /// The upstream refused the request shape (4xx other than auth/quota).
    Rejected(u16),
    /// Transient failure; advance to the next model.
    Retryable(RetryReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Timeout,
    Network,
    ServerError(u16),
    MalformedReply,
    EmptyReply,
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryReason::Timeout => write!(f, "attempt timed out"),
            RetryReason::Network => write!(f, "network error"),
            RetryReason::ServerError(status) => write!(f, "upstream returned {status}"),
            RetryReason::MalformedReply => write!(f, "unparseable reply"),
            RetryReason::EmptyReply => write!(f, "empty reply"),
        }
    }
}

/// Map one upstream response to an [`AttemptOutcome`].
///
/// `retry_after_ms` is the parsed `Retry-After` hint when the transport saw
/// one. Pure; the whole retry-or-abort decision table lives here.
pub fn classify(status: u16, retry_after_ms: Option<u64>, body: &str) -> AttemptOutcome {
    match status {
        401 | 403 => return AttemptOutcome::AuthFailed,
        429 => return AttemptOutcome::RateLimited { retry_after_ms },
        s if s >= 500 => return AttemptOutcome::Retryable(RetryReason::ServerError(s)),
        s if s >= 400 => return AttemptOutcome::Rejected(s),
        _ => {}
    }

    let parsed: GenerateResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) => return AttemptOutcome::Retryable(RetryReason::MalformedReply),
    };

    if parsed
        .prompt_feedback
        .as_ref()
        .is_some_and(|f| f.block_reason.is_some())
    {
        return AttemptOutcome::SafetyBlocked;
    }

    let Some(candidate) = parsed.candidates.first() else {
        return AttemptOutcome::Retryable(RetryReason::MalformedReply);
    };

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return AttemptOutcome::SafetyBlocked;
    }

    let text: String = candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .map(|part| part.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return AttemptOutcome::Retryable(RetryReason::EmptyReply);
    }
    AttemptOutcome::Reply(text.to_string())
}

/// One generateContent attempt against a named model.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(&self, model: &str, request: &GenerateRequest) -> AttemptOutcome;
}

/// Real backend talking to the Google AI API.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different host (tests use a local mock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate(&self, model: &str, request: &GenerateRequest) -> AttemptOutcome {
        let response = match self
            .client
            .post(self.api_url(model))
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(ATTEMPT_TIMEOUT)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return AttemptOutcome::Retryable(RetryReason::Timeout);
            }
            Err(e) => {
                debug!("request to {model} failed: {e}");
                return AttemptOutcome::Retryable(RetryReason::Network);
            }
        };

        let status = response.status();
        let retry_after_ms = parse_retry_after(&response);

        let body = match response.text().await {
            Ok(body) => body,
            Err(_) => return AttemptOutcome::Retryable(RetryReason::Network),
        };

        classify(status.as_u16(), retry_after_ms, &body)
    }
}

/// `Retry-After` in delay-seconds form, converted to milliseconds.
fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply_body(text: &str) -> String {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }]
        })
        .to_string()
    }

    #[test]
    fn classifies_success() {
        assert_eq!(
            classify(200, None, &reply_body("hello")),
            AttemptOutcome::Reply("hello".into())
        );
    }

    #[test]
    fn joins_multi_part_replies() {
        let body = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "one "}, {"text": "two"}]}
            }]
        })
        .to_string();
        assert_eq!(
            classify(200, None, &body),
            AttemptOutcome::Reply("one two".into())
        );
    }

    #[test]
    fn classifies_auth_and_quota_statuses() {
        assert_eq!(classify(401, None, ""), AttemptOutcome::AuthFailed);
        assert_eq!(classify(403, None, ""), AttemptOutcome::AuthFailed);
        assert_eq!(
            classify(429, Some(30_000), ""),
            AttemptOutcome::RateLimited {
                retry_after_ms: Some(30_000)
            }
        );
        assert_eq!(
            classify(429, None, ""),
            AttemptOutcome::RateLimited {
                retry_after_ms: None
            }
        );
    }

    #[test]
    fn server_errors_are_retryable_but_client_errors_abort() {
        assert_eq!(
            classify(500, None, ""),
            AttemptOutcome::Retryable(RetryReason::ServerError(500))
        );
        assert_eq!(
            classify(503, None, ""),
            AttemptOutcome::Retryable(RetryReason::ServerError(503))
        );
        assert_eq!(classify(400, None, ""), AttemptOutcome::Rejected(400));
        assert_eq!(classify(404, None, ""), AttemptOutcome::Rejected(404));
    }

    #[test]
    fn malformed_and_empty_bodies_are_retryable() {
        assert_eq!(
            classify(200, None, "not json"),
            AttemptOutcome::Retryable(RetryReason::MalformedReply)
        );
        assert_eq!(
            classify(200, None, "{}"),
            AttemptOutcome::Retryable(RetryReason::MalformedReply)
        );
        assert_eq!(
            classify(200, None, &reply_body("   ")),
            AttemptOutcome::Retryable(RetryReason::EmptyReply)
        );
    }

    #[test]
    fn safety_blocks_from_either_signal() {
        let feedback = json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string();
        assert_eq!(classify(200, None, &feedback), AttemptOutcome::SafetyBlocked);

        let finish = json!({
            "candidates": [{"finishReason": "SAFETY"}]
        })
        .to_string();
        assert_eq!(classify(200, None, &finish), AttemptOutcome::SafetyBlocked);
    }

    #[test]
    fn request_carries_fixed_generation_parameters() {
        let request = GenerateRequest::new(vec![Content::user("hi")]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 500);
        assert_eq!(value["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(
            value["safetySettings"][0]["threshold"],
            "BLOCK_MEDIUM_AND_ABOVE"
        );
        assert_eq!(value["contents"][0]["role"], "user");
    }
}
